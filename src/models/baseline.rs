//! Learning-free comparators.

use nalgebra::DMatrix;

use crate::domain::{HORIZON_COUNT, HorizonValues, ScalingParams};
use crate::error::AppError;
use crate::models::{Forecaster, check_finite};
use crate::preprocess::normalize_value;

/// Mean-filling baseline: every horizon gets the mean air temperature of the context.
///
/// Normalization is affine, so the mean of normalized values is the normalized
/// mean in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanBaseline {
    /// Column of air temperature in the context matrix.
    pub air_column: usize,
}

impl Forecaster for MeanBaseline {
    fn name(&self) -> &'static str {
        "mean-baseline"
    }

    fn predict(&self, context: &DMatrix<f64>) -> Result<HorizonValues, AppError> {
        check_finite(context)?;
        if self.air_column >= context.ncols() || context.nrows() == 0 {
            return Err(AppError::invalid_input(format!(
                "Context of shape {:?} has no air temperature column {}.",
                context.shape(),
                self.air_column
            )));
        }
        let mean = context.column(self.air_column).mean();
        Ok([mean; HORIZON_COUNT])
    }
}

/// Always predicts the same temperature (the "constant-zero" comparator).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantForecaster {
    normalized: f64,
}

impl ConstantForecaster {
    /// Constant `celsius` expressed in the model's normalized units.
    pub fn celsius(celsius: f64, air: &ScalingParams) -> Self {
        Self {
            normalized: normalize_value(celsius, air),
        }
    }
}

impl Forecaster for ConstantForecaster {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn predict(&self, context: &DMatrix<f64>) -> Result<HorizonValues, AppError> {
        check_finite(context)?;
        Ok([self.normalized; HORIZON_COUNT])
    }
}
