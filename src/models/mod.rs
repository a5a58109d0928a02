//! ForecastModel and its comparators.
//!
//! Every forecaster maps an `L × F` context matrix to normalized air
//! temperature for the four supported horizon slots. The set of forecasters
//! is closed, so callers are generic over [`Forecaster`] rather than boxing.

pub mod baseline;
pub mod encoder;
pub mod layers;
pub mod optim;
pub mod transformer;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{HorizonValues, ModelConfig, Sample};
use crate::error::AppError;

pub use baseline::{ConstantForecaster, MeanBaseline};
pub use optim::{Adam, clip_grad_norm};
pub use transformer::ForecastModel;

pub trait Forecaster {
    fn name(&self) -> &'static str;

    /// Normalized temperature per horizon slot.
    fn predict(&self, context: &DMatrix<f64>) -> Result<HorizonValues, AppError>;
}

impl Forecaster for ForecastModel {
    fn name(&self) -> &'static str {
        "transformer"
    }

    fn predict(&self, context: &DMatrix<f64>) -> Result<HorizonValues, AppError> {
        check_context(context, &self.config)?;
        let out = self.forward(context);
        if out.iter().any(|v| !v.is_finite()) {
            return Err(AppError::numeric("Model produced a non-finite prediction."));
        }
        Ok(out)
    }
}

/// Reject contexts with leftover missing values.
pub fn check_finite(context: &DMatrix<f64>) -> Result<(), AppError> {
    if let Some(pos) = context.iter().position(|v| !v.is_finite()) {
        let (rows, _) = context.shape();
        return Err(AppError::invalid_input(format!(
            "Context contains a missing/non-finite value at row {}, column {}.",
            pos % rows,
            pos / rows
        )));
    }
    Ok(())
}

/// Shape and finiteness check at the model boundary.
pub fn check_context(context: &DMatrix<f64>, config: &ModelConfig) -> Result<(), AppError> {
    let expected = (config.context_length, config.input_dim);
    if context.shape() != expected {
        return Err(AppError::invalid_input(format!(
            "Context shape {:?} does not match the model's {:?}.",
            context.shape(),
            expected
        )));
    }
    check_finite(context)
}

/// Predict every sample, in order.
pub fn predict_all<F: Forecaster + Sync>(
    forecaster: &F,
    samples: &[Sample],
) -> Result<Vec<HorizonValues>, AppError> {
    samples
        .par_iter()
        .map(|s| forecaster.predict(&s.context))
        .collect()
}

/// One parameter tensor as stored in a checkpoint (row-major data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl ForecastModel {
    pub fn export_params(&self) -> Vec<ParamTensor> {
        self.tensors()
            .into_iter()
            .map(|t| ParamTensor {
                rows: t.nrows(),
                cols: t.ncols(),
                data: t.transpose().iter().copied().collect(),
            })
            .collect()
    }

    /// Rebuild a model from checkpointed tensors; shapes must match `config`.
    pub fn from_params(config: ModelConfig, params: &[ParamTensor]) -> Result<Self, AppError> {
        let mut model = ForecastModel::new(config)?;
        let slots = model.tensors_mut();
        if slots.len() != params.len() {
            return Err(AppError::invalid_input(format!(
                "Checkpoint has {} tensors; model expects {}.",
                params.len(),
                slots.len()
            )));
        }
        for (i, (slot, p)) in slots.into_iter().zip(params).enumerate() {
            if slot.shape() != (p.rows, p.cols) || p.data.len() != p.rows * p.cols {
                return Err(AppError::invalid_input(format!(
                    "Checkpoint tensor {i} has shape {}x{} ({} values); model expects {:?}.",
                    p.rows,
                    p.cols,
                    p.data.len(),
                    slot.shape()
                )));
            }
            if p.data.iter().any(|v| !v.is_finite()) {
                return Err(AppError::numeric(format!("Checkpoint tensor {i} is not finite.")));
            }
            *slot = DMatrix::from_row_slice(p.rows, p.cols, &p.data);
        }
        Ok(model)
    }
}
