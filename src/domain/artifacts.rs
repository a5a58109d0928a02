//! On-disk schemas: model checkpoints and evaluation reports.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{ExperimentConfig, NormalizationStats, StationId};
use crate::models::ParamTensor;
use crate::preprocess::SkippedStation;

/// Best parameter set of one fold plus everything needed to reuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub tool: String,
    pub config: ExperimentConfig,
    pub stats: NormalizationStats,
    pub train_station_ids: BTreeSet<StationId>,
    pub test_station_ids: BTreeSet<StationId>,
    /// Epoch (1-based) the parameters were taken from.
    pub epoch: usize,
    pub val_loss: f64,
    pub params: Vec<ParamTensor>,
}

/// Frost/no-frost confusion counts (positive = frost).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

/// Metrics of one forecaster at one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonMetrics {
    pub hours: u32,
    pub samples: usize,
    /// Regression errors in °C.
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub confusion: Confusion,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Internal or external test results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalGroup {
    pub station_ids: BTreeSet<StationId>,
    pub samples: usize,
    pub model: Vec<HorizonMetrics>,
    pub baseline: Vec<HorizonMetrics>,
}

/// How training ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    MaxEpochsReached,
    /// Evaluation of an existing checkpoint; no training in this run.
    Reloaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold_index: usize,
    pub horizons: Vec<u32>,
    pub context_length: usize,
    pub stop_reason: StopReason,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub checkpoint: String,
    pub train_samples: usize,
    pub val_samples: usize,
    pub internal: EvalGroup,
    pub external: EvalGroup,
    pub skipped_stations: Vec<SkippedStation>,
    /// Anchors dropped because a target was imputed.
    pub skipped_targets: usize,
    /// Stations shorter than `L + max(horizon)`.
    pub short_stations: Vec<StationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldFailure {
    pub fold_index: usize,
    pub kind: String,
    pub message: String,
}

/// Everything one `train`/`evaluate` invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub tool: String,
    pub folds: Vec<FoldReport>,
    pub failures: Vec<FoldFailure>,
}
