//! WindowSampler: (context, multi-horizon target) samples from imputed series.
//!
//! An anchor `t` yields a sample only if the context `[t-L+1, t]` and every
//! configured target `t+h` lie inside the series, and no target air
//! temperature was produced by imputation. Frost labels are computed on
//! denormalized temperature.

use std::f64::consts::PI;

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::domain::{
    HORIZON_COUNT, HorizonTarget, NormalizationStats, PreprocessConfig, Record, Sample,
    ScalingParams, Series, Season, Variable, WindowConfig,
};
use crate::error::AppError;
use crate::preprocess::denormalize_value;

/// Frost threshold in °C (frost is strictly below).
pub const FROST_THRESHOLD_C: f64 = 0.0;

/// Resolution denormalized temperatures are rounded to, far finer than any sensor.
const CELSIUS_RESOLUTION: f64 = 1e-9;

/// `celsius < 0.0`; exactly 0.0 °C is not frost.
pub fn is_frost(celsius: f64) -> bool {
    celsius < FROST_THRESHOLD_C
}

/// Denormalize a target temperature, dropping normalization round-off.
///
/// A reading of 0.0 °C comes back as 0.0 (not `-1e-16`), so the strict frost
/// rule sees the value that was observed.
pub fn target_celsius(z: f64, air: &ScalingParams) -> f64 {
    let celsius = denormalize_value(z, air);
    let rounded = (celsius / CELSIUS_RESOLUTION).round() * CELSIUS_RESOLUTION;
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Samples from one or more series plus skip counters.
#[derive(Debug, Clone, Default)]
pub struct WindowOutput {
    pub samples: Vec<Sample>,
    /// Anchors dropped because a target was imputed or missing.
    pub skipped_targets: usize,
    /// Stations too short for a single sample.
    pub short_stations: Vec<u32>,
}

impl WindowOutput {
    fn extend(&mut self, other: WindowOutput) {
        self.samples.extend(other.samples);
        self.skipped_targets += other.skipped_targets;
        self.short_stations.extend(other.short_stations);
    }
}

/// Air-temperature scaling, needed to denormalize targets.
pub fn target_scaling(stats: &NormalizationStats) -> Result<ScalingParams, AppError> {
    stats
        .get(Variable::AirTemperature)
        .map(|s| s.params)
        .ok_or_else(|| AppError::insufficient_data("Normalization stats lack air temperature."))
}

/// Slice one imputed series into samples.
pub fn sample_series(
    series: &Series,
    preprocess: &PreprocessConfig,
    window: &WindowConfig,
    stats: &NormalizationStats,
) -> Result<WindowOutput, AppError> {
    let air = target_scaling(stats)?;
    let n = series.len();
    let l = window.context_length;
    let max_h = window.horizons.max_hours() as usize;

    let mut out = WindowOutput::default();
    if n < l + max_h {
        out.short_stations.push(series.station_id);
        return Ok(out);
    }

    let air_idx = Variable::AirTemperature.index();
    let mut t = l - 1;
    while t + max_h < n {
        let mut targets: [Option<HorizonTarget>; HORIZON_COUNT] = [None; HORIZON_COUNT];
        let mut usable = true;
        for (slot, hours) in window.horizons.iter() {
            let rec = &series.records[t + hours as usize];
            match rec.values[air_idx] {
                Some(z) if !rec.imputed[air_idx] => {
                    let celsius = target_celsius(z, &air);
                    targets[slot] = Some(HorizonTarget {
                        hours,
                        air_temperature: celsius,
                        normalized: z,
                        is_frost: is_frost(celsius),
                    });
                }
                _ => {
                    usable = false;
                    break;
                }
            }
        }

        if usable {
            let rows = &series.records[t + 1 - l..=t];
            out.samples.push(Sample {
                station_id: series.station_id,
                anchor: series.records[t].timestamp,
                context: context_matrix(rows, preprocess),
                targets,
            });
        } else {
            out.skipped_targets += 1;
        }
        t += window.stride;
    }
    Ok(out)
}

/// Sample many series in parallel; output keeps the input order.
pub fn sample_all(
    series: &[Series],
    preprocess: &PreprocessConfig,
    window: &WindowConfig,
    stats: &NormalizationStats,
) -> Result<WindowOutput, AppError> {
    let parts: Vec<WindowOutput> = series
        .par_iter()
        .map(|s| sample_series(s, preprocess, window, stats))
        .collect::<Result<_, _>>()?;

    let mut out = WindowOutput::default();
    for part in parts {
        out.extend(part);
    }
    Ok(out)
}

/// Build the `L × F` model input: features, hour sine/cosine, season one-hot.
///
/// Missing values become NaN so the model boundary can reject them.
fn context_matrix(rows: &[Record], preprocess: &PreprocessConfig) -> DMatrix<f64> {
    let n_vars = preprocess.features.len();
    let width = preprocess.feature_count();
    DMatrix::from_fn(rows.len(), width, |r, c| {
        let rec = &rows[r];
        if c < n_vars {
            return rec.value(preprocess.features[c]).unwrap_or(f64::NAN);
        }
        let angle = 2.0 * PI * f64::from(rec.hour_of_day) / 24.0;
        match c - n_vars {
            0 => angle.sin(),
            1 => angle.cos(),
            k => season_flag(rec.season, k - 2),
        }
    })
}

fn season_flag(season: Season, k: usize) -> f64 {
    if season.index() == k { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HorizonSet, Observation, Stage, VariableStats};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn stats() -> NormalizationStats {
        NormalizationStats {
            source_station_ids: BTreeSet::from([1]),
            variables: vec![VariableStats {
                variable: Variable::AirTemperature,
                params: ScalingParams::ZScore { mean: 0.0, std: 1.0 },
                count: 1,
            }],
        }
    }

    fn imputed(temps: &[f64]) -> Series {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Series {
            station_id: 1,
            stage: Stage::Imputed,
            records: temps
                .iter()
                .enumerate()
                .map(|(i, &t)| {
                    let mut obs = Observation::missing(start + chrono::Duration::hours(i as i64));
                    obs.values[Variable::AirTemperature.index()] = Some(t);
                    Record::from_observation(&obs)
                })
                .collect(),
        }
    }

    fn preprocess() -> PreprocessConfig {
        PreprocessConfig {
            features: vec![Variable::AirTemperature],
            ..PreprocessConfig::default()
        }
    }

    fn window(l: usize, hours: &[u32]) -> WindowConfig {
        WindowConfig {
            context_length: l,
            horizons: HorizonSet::from_hours(hours).unwrap(),
            stride: 1,
        }
    }

    #[test]
    fn exact_length_yields_one_sample() {
        let w = window(24, &[3, 6, 12, 24]);
        let out = sample_series(&imputed(&vec![1.0; 48]), &preprocess(), &w, &stats()).unwrap();
        assert_eq!(out.samples.len(), 1);

        let out = sample_series(&imputed(&vec![1.0; 47]), &preprocess(), &w, &stats()).unwrap();
        assert!(out.samples.is_empty());
        assert_eq!(out.short_stations, vec![1]);
    }

    #[test]
    fn frost_boundary_is_strict() {
        assert!(!is_frost(0.0));
        assert!(is_frost(-1e-14));
        assert!(is_frost(-0.1));
    }

    #[test]
    fn zero_celsius_survives_the_scaler_round_trip() {
        for p in [
            ScalingParams::ZScore { mean: 7.3, std: 3.1 },
            ScalingParams::ZScore { mean: 0.1, std: 0.7 },
            ScalingParams::MinMax { min: -12.7, max: 41.3 },
        ] {
            let z = crate::preprocess::normalize_value(0.0, &p);
            let back = target_celsius(z, &p);
            assert_eq!(back, 0.0);
            assert!(back.is_sign_positive());
            assert!(!is_frost(back));

            let cold = target_celsius(crate::preprocess::normalize_value(-0.1, &p), &p);
            assert!(is_frost(cold));
            assert!((cold + 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn targets_carry_denormalized_labels() {
        let mut temps = vec![5.0; 30];
        temps[5 + 3] = 0.0;
        temps[5 + 6] = -0.1;
        let w = window(6, &[3, 6]);
        let out = sample_series(&imputed(&temps), &preprocess(), &w, &stats()).unwrap();
        let first = &out.samples[0];
        assert_eq!(first.anchor.format("%H").to_string(), "05");
        let t3 = first.targets[0].unwrap();
        let t6 = first.targets[1].unwrap();
        assert_eq!(t3.hours, 3);
        assert!(!t3.is_frost);
        assert!(t6.is_frost);
        assert!(first.targets[2].is_none());
    }

    #[test]
    fn context_ends_at_anchor_and_has_temporal_columns() {
        let temps: Vec<f64> = (0..10).map(f64::from).collect();
        let w = window(4, &[3]);
        let out = sample_series(&imputed(&temps), &preprocess(), &w, &stats()).unwrap();
        assert_eq!(out.samples.len(), 4);
        let s = &out.samples[0];
        assert_eq!(s.context.nrows(), 4);
        assert_eq!(s.context.ncols(), preprocess().feature_count());
        assert_eq!(s.context[(3, 0)], 3.0);
        // Midnight: sin 0, cos 1; January is winter.
        assert_eq!(s.context[(0, 1)], 0.0);
        assert_eq!(s.context[(0, 2)], 1.0);
        assert_eq!(s.context[(0, 3 + Season::Winter.index())], 1.0);
    }

    #[test]
    fn imputed_targets_are_skipped() {
        let mut series = imputed(&vec![1.0; 8]);
        series.records[7].imputed[Variable::AirTemperature.index()] = true;
        let w = window(2, &[6]);
        let out = sample_series(&series, &preprocess(), &w, &stats()).unwrap();
        assert_eq!(out.samples.len(), 0);
        assert_eq!(out.skipped_targets, 1);
    }
}
