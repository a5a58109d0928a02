//! Stage 3: normalization with train-only statistics.
//!
//! Stats are a single reduction over the cleaned train stations of a fold.
//! Per-station partials are computed in parallel and merged in station order,
//! so the result does not depend on thread scheduling. Test stations reuse the
//! train stats verbatim; nothing here ever looks at test data.

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::domain::{
    NormalizationStats, Scaling, ScalingParams, Series, Stage, StationId, Variable, VariableStats,
};
use crate::error::AppError;

/// Spreads below this are treated as constant series.
const MIN_SPREAD: f64 = 1e-12;

/// Running moments for one variable (Welford, mergeable).
#[derive(Debug, Clone, Copy)]
struct Moments {
    count: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Moments {
    fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    fn merge(self, other: Moments) -> Moments {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / count as f64;
        Moments {
            count,
            mean,
            m2,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Compute normalization stats from cleaned train series.
///
/// Every variable with at least one observation gets stats; each variable in
/// `required` must have some, otherwise the fold cannot be normalized.
pub fn compute_stats(train: &[Series], required: &[Variable]) -> Result<NormalizationStats, AppError> {
    if let Some(s) = train.iter().find(|s| s.stage != Stage::Cleaned) {
        return Err(AppError::invalid_input(format!(
            "Station {}: stats must be computed on cleaned, unnormalized series (stage {:?}).",
            s.station_id, s.stage
        )));
    }

    let partials: Vec<[Moments; Variable::COUNT]> = train
        .par_iter()
        .map(|series| {
            let mut acc = [Moments::new(); Variable::COUNT];
            for rec in &series.records {
                for (idx, value) in rec.values.iter().enumerate() {
                    if let Some(x) = value {
                        acc[idx].push(*x);
                    }
                }
            }
            acc
        })
        .collect();

    let mut totals = [Moments::new(); Variable::COUNT];
    for partial in partials {
        for idx in 0..Variable::COUNT {
            totals[idx] = totals[idx].merge(partial[idx]);
        }
    }

    let mut variables = Vec::new();
    for v in Variable::ALL {
        let m = totals[v.index()];
        if m.count == 0 {
            if required.contains(&v) {
                return Err(AppError::insufficient_data(format!(
                    "No observed {} values in the train stations; cannot compute normalization stats.",
                    v.display_name()
                )));
            }
            continue;
        }
        let params = match v.scaling() {
            Scaling::ZScore => {
                let std = (m.m2 / m.count as f64).sqrt();
                ScalingParams::ZScore {
                    mean: m.mean,
                    std: if std > MIN_SPREAD { std } else { 1.0 },
                }
            }
            Scaling::MinMax => ScalingParams::MinMax {
                min: m.min,
                max: if m.max - m.min > MIN_SPREAD { m.max } else { m.min + 1.0 },
            },
        };
        variables.push(VariableStats {
            variable: v,
            params,
            count: m.count,
        });
    }

    let source_station_ids: BTreeSet<StationId> = train.iter().map(|s| s.station_id).collect();
    Ok(NormalizationStats {
        source_station_ids,
        variables,
    })
}

pub fn normalize_value(x: f64, params: &ScalingParams) -> f64 {
    match *params {
        ScalingParams::ZScore { mean, std } => (x - mean) / std,
        ScalingParams::MinMax { min, max } => (x - min) / (max - min),
    }
}

pub fn denormalize_value(z: f64, params: &ScalingParams) -> f64 {
    match *params {
        ScalingParams::ZScore { mean, std } => z * std + mean,
        ScalingParams::MinMax { min, max } => z * (max - min) + min,
    }
}

/// Apply train stats to a cleaned series.
///
/// Variables without stats are left as they are (they had no train data and
/// are not model features).
pub fn normalize(mut series: Series, stats: &NormalizationStats) -> Result<Series, AppError> {
    if series.stage >= Stage::Normalized {
        return Ok(series);
    }
    if series.stage != Stage::Cleaned {
        return Err(AppError::invalid_input(format!(
            "Station {}: normalization requires a cleaned series (stage {:?}).",
            series.station_id, series.stage
        )));
    }

    let params: Vec<(usize, ScalingParams)> = stats
        .variables
        .iter()
        .map(|s| (s.variable.index(), s.params))
        .collect();

    for rec in &mut series.records {
        for (idx, p) in &params {
            if let Some(x) = rec.values[*idx] {
                rec.values[*idx] = Some(normalize_value(x, p));
            }
        }
    }
    series.stage = Stage::Normalized;
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observation, Record};
    use chrono::NaiveDate;

    fn cleaned(id: StationId, temps: &[f64], humidity: &[f64]) -> Series {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let records = temps
            .iter()
            .zip(humidity)
            .enumerate()
            .map(|(i, (&t, &h))| {
                let mut obs = Observation::missing(start + chrono::Duration::hours(i as i64));
                obs.values[Variable::AirTemperature.index()] = Some(t);
                obs.values[Variable::RelativeHumidity.index()] = Some(h);
                Record::from_observation(&obs)
            })
            .collect();
        Series {
            station_id: id,
            stage: Stage::Cleaned,
            records,
        }
    }

    #[test]
    fn stats_pool_all_train_stations() {
        let a = cleaned(1, &[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]);
        let b = cleaned(2, &[4.0, 5.0], &[40.0, 90.0]);
        let stats = compute_stats(&[a, b], &[Variable::AirTemperature]).unwrap();

        match stats.get(Variable::AirTemperature).unwrap().params {
            ScalingParams::ZScore { mean, std } => {
                assert!((mean - 3.0).abs() < 1e-12);
                assert!((std - 2.0_f64.sqrt()).abs() < 1e-12);
            }
            other => panic!("unexpected params {other:?}"),
        }
        match stats.get(Variable::RelativeHumidity).unwrap().params {
            ScalingParams::MinMax { min, max } => {
                assert_eq!(min, 10.0);
                assert_eq!(max, 90.0);
            }
            other => panic!("unexpected params {other:?}"),
        }
        assert!(stats.get(Variable::WindSpeed).is_none());
        assert_eq!(stats.source_station_ids.len(), 2);
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        let a = cleaned(1, &[1.0], &[10.0]);
        assert!(compute_stats(&[a], &[Variable::DewPoint]).is_err());
    }

    #[test]
    fn normalize_then_denormalize_round_trips() {
        let params = [
            ScalingParams::ZScore { mean: 7.5, std: 3.25 },
            ScalingParams::MinMax { min: 0.0, max: 360.0 },
        ];
        for p in &params {
            for &x in &[-12.3, 0.0, 0.1, 45.6, 359.9] {
                let back = denormalize_value(normalize_value(x, p), p);
                assert!((back - x).abs() < 1e-9, "{x} -> {back} with {p:?}");
            }
        }
    }

    #[test]
    fn constant_series_does_not_divide_by_zero() {
        let a = cleaned(1, &[2.0, 2.0], &[50.0, 50.0]);
        let stats = compute_stats(&[a.clone()], &[]).unwrap();
        let out = normalize(a, &stats).unwrap();
        for rec in &out.records {
            assert_eq!(rec.value(Variable::AirTemperature), Some(0.0));
            assert_eq!(rec.value(Variable::RelativeHumidity), Some(0.0));
        }
    }
}
