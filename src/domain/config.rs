//! Explicit run configuration.
//!
//! Every component receives the slice of configuration it needs as an argument;
//! nothing is read from process-wide state. `validate()` methods raise
//! `ConfigurationError`, which is fatal for the whole run.

use serde::{Deserialize, Serialize};

use crate::domain::types::{HORIZONS, HorizonSet, Season, Variable};
use crate::error::AppError;

/// Number of spatial folds.
pub const FOLD_COUNT: usize = 3;

/// Hour-of-day sine/cosine plus a one-hot season indicator.
pub const TEMPORAL_FEATURES: usize = 2 + Season::COUNT;

/// Default model input variables.
pub const DEFAULT_FEATURES: [Variable; 7] = [
    Variable::AirTemperature,
    Variable::DewPoint,
    Variable::RelativeHumidity,
    Variable::SoilTemperature,
    Variable::WindSpeed,
    Variable::WindDirection,
    Variable::SolarRadiation,
];

/// Physically valid interval for one variable (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub variable: Variable,
    pub min: f64,
    pub max: f64,
}

/// Outlier table used by the cleaning stage.
///
/// Variables without an entry are never cleaned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidRangeTable {
    pub ranges: Vec<ValidRange>,
}

impl Default for ValidRangeTable {
    fn default() -> Self {
        let r = |variable, min, max| ValidRange { variable, min, max };
        Self {
            ranges: vec![
                r(Variable::Eto, 0.0, 5.0),
                r(Variable::Precip, 0.0, 150.0),
                r(Variable::SolarRadiation, 0.0, 1400.0),
                r(Variable::VaporPressure, 0.0, 8.0),
                r(Variable::AirTemperature, -30.0, 55.0),
                r(Variable::RelativeHumidity, 0.0, 100.0),
                r(Variable::DewPoint, -40.0, 40.0),
                r(Variable::WindSpeed, 0.0, 50.0),
                r(Variable::WindDirection, 0.0, 360.0),
                r(Variable::SoilTemperature, -20.0, 60.0),
            ],
        }
    }
}

impl ValidRangeTable {
    pub fn bounds(&self, variable: Variable) -> Option<(f64, f64)> {
        self.ranges
            .iter()
            .find(|r| r.variable == variable)
            .map(|r| (r.min, r.max))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for r in &self.ranges {
            if !(r.min.is_finite() && r.max.is_finite() && r.min < r.max) {
                return Err(AppError::configuration(format!(
                    "Invalid valid-range for {}: [{}, {}] (must be finite with min < max).",
                    r.variable.display_name(),
                    r.min,
                    r.max
                )));
            }
        }
        Ok(())
    }
}

/// Which variables feed the model and how they are cleaned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub features: Vec<Variable>,
    pub valid_ranges: ValidRangeTable,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            features: DEFAULT_FEATURES.to_vec(),
            valid_ranges: ValidRangeTable::default(),
        }
    }
}

impl PreprocessConfig {
    /// Column of `variable` in a sample's context matrix.
    pub fn feature_index(&self, variable: Variable) -> Option<usize> {
        self.features.iter().position(|&v| v == variable)
    }

    /// Width of a context row: sensor features plus temporal encodings.
    pub fn feature_count(&self) -> usize {
        self.features.len() + TEMPORAL_FEATURES
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.feature_index(Variable::AirTemperature).is_none() {
            return Err(AppError::configuration(
                "Feature set must include air temperature (the forecast target).",
            ));
        }
        let mut seen = [false; Variable::COUNT];
        for v in &self.features {
            if std::mem::replace(&mut seen[v.index()], true) {
                return Err(AppError::configuration(format!(
                    "Duplicate feature: {}.",
                    v.display_name()
                )));
            }
        }
        self.valid_ranges.validate()
    }
}

/// WindowSampler settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Context length `L` in hours.
    pub context_length: usize,
    pub horizons: HorizonSet,
    /// Distance between consecutive anchors in hours.
    pub stride: usize,
}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.context_length == 0 {
            return Err(AppError::configuration("Context length must be > 0."));
        }
        if self.stride == 0 {
            return Err(AppError::configuration("Anchor stride must be > 0."));
        }
        if self.horizons.is_empty() {
            return Err(AppError::configuration("At least one horizon is required."));
        }
        Ok(())
    }
}

/// ForecastModel architecture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_dim: usize,
    pub context_length: usize,
    pub d_model: usize,
    pub n_heads: usize,
    pub n_layers: usize,
    pub ff_dim: usize,
    pub decoder_hidden: usize,
    /// Seed for weight initialization.
    pub seed: u64,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let dims = [
            ("input_dim", self.input_dim),
            ("context_length", self.context_length),
            ("d_model", self.d_model),
            ("n_heads", self.n_heads),
            ("n_layers", self.n_layers),
            ("ff_dim", self.ff_dim),
            ("decoder_hidden", self.decoder_hidden),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(AppError::configuration(format!("Model {name} must be > 0.")));
            }
        }
        if self.d_model % self.n_heads != 0 {
            return Err(AppError::configuration(format!(
                "d_model ({}) must be divisible by n_heads ({}).",
                self.d_model, self.n_heads
            )));
        }
        Ok(())
    }
}

/// TrainEvalEngine settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
    pub learning_rate: f64,
    /// Minimum validation-loss decrease that counts as an improvement.
    pub min_delta: f64,
    /// Global gradient-norm clip (0 disables clipping).
    pub clip_norm: f64,
    /// Share of each train station's anchors used for validation.
    pub val_fraction: f64,
    /// Share of each station's latest anchors never used for fitting.
    pub holdout_fraction: f64,
    /// Seed for batch shuffling.
    pub seed: u64,
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::configuration("Batch size must be > 0."));
        }
        if self.max_epochs == 0 {
            return Err(AppError::configuration("max_epochs must be > 0."));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(AppError::configuration("Learning rate must be finite and > 0."));
        }
        if !(self.min_delta.is_finite() && self.min_delta >= 0.0) {
            return Err(AppError::configuration("min_delta must be finite and >= 0."));
        }
        if !(self.clip_norm.is_finite() && self.clip_norm >= 0.0) {
            return Err(AppError::configuration("clip_norm must be finite and >= 0."));
        }
        let fractions = self.val_fraction + self.holdout_fraction;
        if !(self.val_fraction >= 0.0 && self.holdout_fraction >= 0.0 && fractions < 1.0) {
            return Err(AppError::configuration(
                "val_fraction and holdout_fraction must be >= 0 and sum to < 1.",
            ));
        }
        Ok(())
    }
}

/// Everything that determines one fold's experiment.
///
/// Stored verbatim inside each checkpoint so evaluation can rebuild the exact
/// preprocessing and windowing used for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub fold_index: usize,
    pub preprocess: PreprocessConfig,
    pub window: WindowConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
    /// Single horizon reported by an evaluation run (`None` = all).
    pub pred_len: Option<u32>,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_fold_index(self.fold_index)?;
        self.preprocess.validate()?;
        self.window.validate()?;
        self.model.validate()?;
        self.train.validate()?;

        if self.model.input_dim != self.preprocess.feature_count() {
            return Err(AppError::configuration(format!(
                "Model input_dim ({}) does not match feature count ({}).",
                self.model.input_dim,
                self.preprocess.feature_count()
            )));
        }
        if self.model.context_length != self.window.context_length {
            return Err(AppError::configuration(
                "Model context_length does not match window context_length.",
            ));
        }
        if let Some(h) = self.pred_len {
            validate_pred_len(h, &self.window.horizons)?;
        }
        Ok(())
    }

    /// Horizons reported by evaluation.
    pub fn reported_horizons(&self) -> HorizonSet {
        match self.pred_len.and_then(|h| HorizonSet::from_hours(&[h]).ok()) {
            Some(single) => single,
            None => self.window.horizons,
        }
    }
}

pub fn validate_fold_index(fold_index: usize) -> Result<(), AppError> {
    if fold_index >= FOLD_COUNT {
        return Err(AppError::configuration(format!(
            "Fold index {fold_index} out of range (0..{FOLD_COUNT})."
        )));
    }
    Ok(())
}

pub fn validate_pred_len(hours: u32, horizons: &HorizonSet) -> Result<(), AppError> {
    if !HORIZONS.contains(&hours) {
        return Err(AppError::configuration(format!(
            "pred_len {hours}h is not a supported horizon {HORIZONS:?}."
        )));
    }
    if !horizons.contains(hours) {
        return Err(AppError::configuration(format!(
            "pred_len {hours}h is not among the configured horizons {:?}.",
            horizons.hours()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn experiment() -> ExperimentConfig {
        let preprocess = PreprocessConfig::default();
        let window = WindowConfig {
            context_length: 24,
            horizons: HorizonSet::all(),
            stride: 1,
        };
        ExperimentConfig {
            fold_index: 0,
            model: ModelConfig {
                input_dim: preprocess.feature_count(),
                context_length: 24,
                d_model: 16,
                n_heads: 2,
                n_layers: 1,
                ff_dim: 32,
                decoder_hidden: 16,
                seed: 7,
            },
            preprocess,
            window,
            train: TrainConfig {
                batch_size: 8,
                max_epochs: 3,
                patience: 2,
                learning_rate: 1e-3,
                min_delta: 0.0,
                clip_norm: 1.0,
                val_fraction: 0.1,
                holdout_fraction: 0.2,
                seed: 7,
            },
            pred_len: None,
        }
    }

    #[test]
    fn default_experiment_is_valid() {
        experiment().validate().unwrap();
    }

    #[test]
    fn fold_index_out_of_range_is_configuration_error() {
        let mut cfg = experiment();
        cfg.fold_index = 3;
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn pred_len_must_be_configured() {
        let mut cfg = experiment();
        cfg.window.horizons = HorizonSet::from_hours(&[3, 6]).unwrap();
        cfg.pred_len = Some(24);
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Configuration);

        cfg.pred_len = Some(6);
        cfg.validate().unwrap();
        assert_eq!(cfg.reported_horizons().hours(), vec![6]);
    }

    #[test]
    fn heads_must_divide_width() {
        let mut cfg = experiment();
        cfg.model.n_heads = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn feature_set_requires_air_temperature() {
        let mut cfg = experiment();
        cfg.preprocess.features = vec![Variable::DewPoint];
        assert!(cfg.preprocess.validate().is_err());
    }
}
