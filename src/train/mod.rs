//! Per-fold training and evaluation.
//!
//! A fold failure (too few samples, a diverging run, a bad batch) is logged and
//! recorded in the run report while the other folds continue. Configuration
//! errors abort the whole run.

pub mod data;
pub mod engine;

use std::path::Path;

use tracing::{error, info};

use crate::domain::{ExperimentConfig, FoldFailure, FoldReport, RunReport, StopReason};
use crate::error::AppError;
use crate::io::checkpoint::{checkpoint_path, read_checkpoint};
use crate::registry::StationRegistry;
use crate::split::SplitPlan;

pub use data::{FoldData, TemporalSplit, partition_by_time, prepare_fold};
pub use engine::{
    EpochRecord, Evaluation, TrainEvalEngine, TrainOutcome, TrainState, evaluate_checkpoint, mean_loss,
};

/// Train fold `config.fold_index` from scratch and evaluate its best checkpoint.
pub fn run_fold(
    registry: &StationRegistry,
    plan: &SplitPlan,
    config: &ExperimentConfig,
    checkpoint_dir: &Path,
) -> Result<FoldReport, AppError> {
    config.validate()?;
    let split = plan.fold(config.fold_index)?;
    let external_ids = plan.external_test_ids(config.fold_index);
    let data = prepare_fold(registry, split, &external_ids, config, None)?;

    let path = checkpoint_path(checkpoint_dir, config);
    let mut engine = TrainEvalEngine::new(config.clone(), path.clone())?;
    let outcome = engine.train(&data, split)?;
    let evaluation = engine.evaluate(&data)?;

    Ok(fold_report(
        config,
        &data,
        evaluation,
        FoldProgress {
            stop_reason: outcome.stop_reason,
            epochs_run: outcome.epochs_run,
            best_epoch: outcome.best_epoch,
            best_val_loss: outcome.best_val_loss,
            checkpoint: path.display().to_string(),
        },
    ))
}

/// Evaluate an existing checkpoint without training.
///
/// Preprocessing reuses the checkpoint's normalization stats; the split must
/// assign the same train stations the checkpoint was fitted on.
pub fn evaluate_fold(
    registry: &StationRegistry,
    plan: &SplitPlan,
    checkpoint_file: &Path,
    pred_len: Option<u32>,
) -> Result<FoldReport, AppError> {
    let checkpoint = read_checkpoint(checkpoint_file)?;
    let mut config = checkpoint.config.clone();
    if pred_len.is_some() {
        config.pred_len = pred_len;
        config.validate()?;
    }

    let split = plan.fold(config.fold_index)?;
    if split.train_station_ids != checkpoint.train_station_ids {
        return Err(AppError::configuration(format!(
            "Checkpoint '{}' was trained on a different station split than fold {}.",
            checkpoint_file.display(),
            config.fold_index
        )));
    }
    let external_ids = plan.external_test_ids(config.fold_index);
    let data = prepare_fold(registry, split, &external_ids, &config, Some(checkpoint.stats.clone()))?;

    let mut checkpoint = checkpoint;
    checkpoint.config = config.clone();
    let evaluation = evaluate_checkpoint(&checkpoint, &data.internal, &data.external)?;

    Ok(fold_report(
        &config,
        &data,
        evaluation,
        FoldProgress {
            stop_reason: StopReason::Reloaded,
            epochs_run: 0,
            best_epoch: checkpoint.epoch,
            best_val_loss: checkpoint.val_loss,
            checkpoint: checkpoint_file.display().to_string(),
        },
    ))
}

/// Run several folds; non-fatal fold errors are recorded, not returned.
pub fn run_folds(
    registry: &StationRegistry,
    plan: &SplitPlan,
    base: &ExperimentConfig,
    folds: &[usize],
    checkpoint_dir: &Path,
) -> Result<RunReport, AppError> {
    let mut report = RunReport {
        tool: "frost".to_string(),
        ..RunReport::default()
    };
    for &fold_index in folds {
        let config = ExperimentConfig {
            fold_index,
            ..base.clone()
        };
        info!(fold = fold_index, "fold started");
        match run_fold(registry, plan, &config, checkpoint_dir) {
            Ok(fold) => report.folds.push(fold),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(fold = fold_index, "fold failed: {e}");
                report.failures.push(failure(fold_index, &e));
            }
        }
    }
    Ok(report)
}

pub fn failure(fold_index: usize, e: &AppError) -> FoldFailure {
    FoldFailure {
        fold_index,
        kind: e.kind().label().to_string(),
        message: e.message().to_string(),
    }
}

struct FoldProgress {
    stop_reason: StopReason,
    epochs_run: usize,
    best_epoch: usize,
    best_val_loss: f64,
    checkpoint: String,
}

fn fold_report(
    config: &ExperimentConfig,
    data: &FoldData,
    evaluation: Evaluation,
    progress: FoldProgress,
) -> FoldReport {
    FoldReport {
        fold_index: config.fold_index,
        horizons: config.reported_horizons().hours(),
        context_length: config.window.context_length,
        stop_reason: progress.stop_reason,
        epochs_run: progress.epochs_run,
        best_epoch: progress.best_epoch,
        best_val_loss: progress.best_val_loss,
        checkpoint: progress.checkpoint,
        train_samples: data.split.train.len(),
        val_samples: data.split.validation.len(),
        internal: evaluation.internal,
        external: evaluation.external,
        skipped_stations: data.skipped.clone(),
        skipped_targets: data.skipped_targets,
        short_stations: data.short_stations.clone(),
    }
}
