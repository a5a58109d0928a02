//! Regression and frost-classification metrics.
//!
//! Predictions are denormalized to °C before scoring; a predicted frost event
//! is a predicted temperature strictly below 0 °C, the same rule used for
//! labels.

use tracing::debug;

use crate::domain::{
    Confusion, HorizonMetrics, HorizonSet, HorizonValues, Sample, ScalingParams,
};
use crate::error::AppError;
use crate::models::{Forecaster, predict_all};
use crate::preprocess::denormalize_value;
use crate::window::is_frost;

impl Confusion {
    pub fn push(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, false) => self.tn += 1,
            (false, true) => self.fn_ += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// 0 when nothing was predicted as frost.
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// 0 when there were no frost events.
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Score `(predicted °C, actual °C, actual frost)` triples for one horizon.
pub fn horizon_metrics(hours: u32, scored: &[(f64, f64, bool)]) -> HorizonMetrics {
    let n = scored.len();
    let mut sq = 0.0;
    let mut abs = 0.0;
    let mut confusion = Confusion::default();
    for &(pred, actual, frost) in scored {
        let err = pred - actual;
        sq += err * err;
        abs += err.abs();
        confusion.push(is_frost(pred), frost);
    }
    let denom = n.max(1) as f64;
    let mse = sq / denom;
    HorizonMetrics {
        hours,
        samples: n,
        mse,
        rmse: mse.sqrt(),
        mae: abs / denom,
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1(),
        confusion,
    }
}

/// Metrics for already-computed predictions, one entry per reported horizon.
pub fn score_predictions(
    predictions: &[HorizonValues],
    samples: &[Sample],
    horizons: &HorizonSet,
    air: &ScalingParams,
) -> Vec<HorizonMetrics> {
    horizons
        .iter()
        .map(|(slot, hours)| {
            let scored: Vec<(f64, f64, bool)> = predictions
                .iter()
                .zip(samples)
                .filter_map(|(pred, sample)| {
                    sample.targets[slot].map(|t| {
                        (denormalize_value(pred[slot], air), t.air_temperature, t.is_frost)
                    })
                })
                .collect();
            horizon_metrics(hours, &scored)
        })
        .collect()
}

/// Predict and score a sample set with any forecaster.
pub fn evaluate_forecaster<F: Forecaster + Sync>(
    forecaster: &F,
    samples: &[Sample],
    horizons: &HorizonSet,
    air: &ScalingParams,
) -> Result<Vec<HorizonMetrics>, AppError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    debug!(forecaster = forecaster.name(), samples = samples.len(), "scoring");
    let predictions = predict_all(forecaster, samples)?;
    Ok(score_predictions(&predictions, samples, horizons, air))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confusion_metrics() {
        let mut c = Confusion::default();
        c.push(true, true);
        c.push(true, false);
        c.push(false, true);
        c.push(false, false);
        c.push(false, false);
        assert_eq!(c.total(), 5);
        assert!((c.accuracy() - 0.6).abs() < 1e-12);
        assert!((c.precision() - 0.5).abs() < 1e-12);
        assert!((c.recall() - 0.5).abs() < 1e-12);
        assert!((c.f1() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_classes_do_not_divide_by_zero() {
        let mut c = Confusion::default();
        c.push(false, false);
        assert_eq!(c.precision(), 0.0);
        assert_eq!(c.recall(), 0.0);
        assert_eq!(c.f1(), 0.0);
        assert_eq!(c.accuracy(), 1.0);
    }

    #[test]
    fn regression_errors_in_celsius() {
        let m = horizon_metrics(3, &[(1.0, 0.0, false), (-1.0, -3.0, true)]);
        assert_eq!(m.samples, 2);
        assert!((m.mse - 2.5).abs() < 1e-12);
        assert!((m.mae - 1.5).abs() < 1e-12);
        assert!((m.rmse - 2.5_f64.sqrt()).abs() < 1e-12);
        assert_eq!(m.confusion.tp, 1);
        assert_eq!(m.confusion.tn, 1);
    }
}
