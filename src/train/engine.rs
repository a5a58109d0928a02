//! TrainEvalEngine: fit one fold, keep the best checkpoint, evaluate it.
//!
//! ```text
//! Initialized → Training → {Converged, MaxEpochsReached} → Evaluated
//! ```
//!
//! Steps are strictly sequential; only the per-sample gradients inside one
//! batch run in parallel, and they are summed in batch order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    EvalGroup, ExperimentConfig, HORIZON_COUNT, ModelCheckpoint, Sample, Split, StationId,
    StopReason, Variable,
};
use crate::error::AppError;
use crate::io::checkpoint::{read_checkpoint, write_checkpoint};
use crate::models::{Adam, ForecastModel, MeanBaseline, check_context, clip_grad_norm, predict_all};
use crate::report::evaluate_forecaster;
use crate::train::data::FoldData;
use crate::window::target_scaling;

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    Initialized,
    Training { epoch: usize },
    Converged { best_epoch: usize },
    MaxEpochsReached { best_epoch: usize },
    Evaluated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub improved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub stop_reason: StopReason,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub history: Vec<EpochRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub internal: EvalGroup,
    pub external: EvalGroup,
}

pub struct TrainEvalEngine {
    config: ExperimentConfig,
    checkpoint_path: PathBuf,
    state: TrainState,
}

impl TrainEvalEngine {
    pub fn new(config: ExperimentConfig, checkpoint_path: PathBuf) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            config,
            checkpoint_path,
            state: TrainState::Initialized,
        })
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Fit a fresh model on `data.split.train`, selecting by validation loss.
    ///
    /// The best parameters are written to the checkpoint path every time the
    /// validation loss improves.
    pub fn train(&mut self, data: &FoldData, split: &Split) -> Result<TrainOutcome, AppError> {
        if self.state != TrainState::Initialized {
            return Err(AppError::invalid_input(format!(
                "Engine cannot train from state {:?}.",
                self.state
            )));
        }
        let train = &data.split.train;
        if train.is_empty() {
            return Err(AppError::insufficient_data(format!(
                "Fold {}: no training samples.",
                self.config.fold_index
            )));
        }
        let validation: &[Sample] = if data.split.validation.is_empty() {
            warn!(
                fold = self.config.fold_index,
                "no validation samples; early stopping uses the training loss"
            );
            train
        } else {
            &data.split.validation
        };

        let tc = self.config.train;
        let mut model = ForecastModel::new(self.config.model)?;
        let mut adam = Adam::new(&model, tc.learning_rate);
        let mut rng = StdRng::seed_from_u64(tc.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();

        let mut best_val_loss = f64::INFINITY;
        let mut best_epoch = 0usize;
        let mut since_improved = 0usize;
        let mut history = Vec::new();
        let mut stop_reason = StopReason::MaxEpochsReached;

        info!(
            fold = self.config.fold_index,
            parameters = model.parameter_count(),
            train = train.len(),
            validation = validation.len(),
            "training started"
        );

        for epoch in 1..=tc.max_epochs {
            self.state = TrainState::Training { epoch };
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0;
            for batch in order.chunks(tc.batch_size) {
                let (loss, mut grad) = batch_gradient(&model, train, batch)?;
                clip_grad_norm(&mut grad, tc.clip_norm);
                adam.step(&mut model, &grad);
                loss_sum += loss * batch.len() as f64;
            }
            let train_loss = loss_sum / train.len() as f64;
            let val_loss = mean_loss(&model, validation)?;
            if !(train_loss.is_finite() && val_loss.is_finite() && model.is_finite()) {
                return Err(AppError::numeric(format!(
                    "Fold {}: training diverged at epoch {epoch}.",
                    self.config.fold_index
                )));
            }

            let improved = val_loss < best_val_loss - tc.min_delta;
            if improved {
                best_val_loss = val_loss;
                best_epoch = epoch;
                since_improved = 0;
                self.save(&model, data, split, epoch, val_loss)?;
            } else {
                since_improved += 1;
            }
            info!(epoch, train_loss, val_loss, improved, "epoch finished");
            history.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                improved,
            });

            // patience == 0 disables early stopping.
            if tc.patience > 0 && since_improved >= tc.patience {
                stop_reason = StopReason::Converged;
                break;
            }
        }

        self.state = match stop_reason {
            StopReason::Converged => TrainState::Converged { best_epoch },
            _ => TrainState::MaxEpochsReached { best_epoch },
        };
        info!(
            fold = self.config.fold_index,
            ?stop_reason,
            best_epoch,
            best_val_loss,
            "training finished"
        );
        Ok(TrainOutcome {
            stop_reason,
            epochs_run: history.len(),
            best_epoch,
            best_val_loss,
            history,
        })
    }

    /// Reload the best checkpoint from disk and evaluate it.
    pub fn evaluate(&mut self, data: &FoldData) -> Result<Evaluation, AppError> {
        if !matches!(
            self.state,
            TrainState::Converged { .. } | TrainState::MaxEpochsReached { .. }
        ) {
            return Err(AppError::invalid_input(format!(
                "Engine cannot evaluate from state {:?}.",
                self.state
            )));
        }
        let checkpoint = read_checkpoint(&self.checkpoint_path)?;
        let evaluation = evaluate_checkpoint(&checkpoint, &data.internal, &data.external)?;
        self.state = TrainState::Evaluated;
        Ok(evaluation)
    }

    fn save(
        &self,
        model: &ForecastModel,
        data: &FoldData,
        split: &Split,
        epoch: usize,
        val_loss: f64,
    ) -> Result<(), AppError> {
        let checkpoint = ModelCheckpoint {
            tool: "frost".to_string(),
            config: self.config.clone(),
            stats: data.stats.clone(),
            train_station_ids: split.train_station_ids.clone(),
            test_station_ids: split.test_station_ids.clone(),
            epoch,
            val_loss,
            params: model.export_params(),
        };
        write_checkpoint(&self.checkpoint_path, &checkpoint)
    }
}

/// Score a checkpoint and the mean baseline on internal and external samples.
pub fn evaluate_checkpoint(
    checkpoint: &ModelCheckpoint,
    internal: &[Sample],
    external: &[Sample],
) -> Result<Evaluation, AppError> {
    let config = &checkpoint.config;
    let model = ForecastModel::from_params(config.model, &checkpoint.params)?;
    let air_column = config
        .preprocess
        .feature_index(Variable::AirTemperature)
        .ok_or_else(|| AppError::configuration("Air temperature is not a model feature."))?;
    let baseline = MeanBaseline { air_column };
    let air = target_scaling(&checkpoint.stats)?;
    let horizons = config.reported_horizons();

    let group = |samples: &[Sample]| -> Result<EvalGroup, AppError> {
        let station_ids: BTreeSet<StationId> = samples.iter().map(|s| s.station_id).collect();
        Ok(EvalGroup {
            station_ids,
            samples: samples.len(),
            model: evaluate_forecaster(&model, samples, &horizons, &air)?,
            baseline: evaluate_forecaster(&baseline, samples, &horizons, &air)?,
        })
    };
    Ok(Evaluation {
        internal: group(internal)?,
        external: group(external)?,
    })
}

/// Mean loss and averaged gradient of one batch.
fn batch_gradient(
    model: &ForecastModel,
    samples: &[Sample],
    batch: &[usize],
) -> Result<(f64, ForecastModel), AppError> {
    let parts: Vec<(f64, ForecastModel)> = batch
        .par_iter()
        .map(|&i| {
            let sample = &samples[i];
            check_context(&sample.context, &model.config)?;
            let (target, mask) = sample.target_vector();
            let mut grad = model.zeros_like();
            let loss = model.loss_and_gradient(&sample.context, &target, &mask, &mut grad);
            Ok((loss, grad))
        })
        .collect::<Result<_, AppError>>()?;

    let mut total = model.zeros_like();
    let mut loss = 0.0;
    for (l, g) in &parts {
        loss += l;
        total.add_scaled(g, 1.0);
    }
    let n = batch.len() as f64;
    total.scale(1.0 / n);
    Ok((loss / n, total))
}

/// Masked MSE in normalized units, averaged over samples.
pub fn mean_loss(model: &ForecastModel, samples: &[Sample]) -> Result<f64, AppError> {
    if samples.is_empty() {
        return Ok(0.0);
    }
    let predictions = predict_all(model, samples)?;
    let mut total = 0.0;
    for (pred, sample) in predictions.iter().zip(samples) {
        let (target, mask) = sample.target_vector();
        let active = mask.iter().filter(|m| **m).count();
        if active == 0 {
            continue;
        }
        let sq: f64 = (0..HORIZON_COUNT)
            .filter(|&slot| mask[slot])
            .map(|slot| (pred[slot] - target[slot]).powi(2))
            .sum();
        total += sq / active as f64;
    }
    Ok(total / samples.len() as f64)
}
