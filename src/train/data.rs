//! Fold data: preprocessing, windowing and the temporal train/val/hold-out cut.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::domain::{ExperimentConfig, NormalizationStats, Sample, Split, StationId};
use crate::error::AppError;
use crate::preprocess::{SkippedStation, fit_stats, preprocess_stations};
use crate::registry::StationRegistry;
use crate::window::sample_all;

/// Chronological cut of the train stations' samples.
#[derive(Debug, Clone, Default)]
pub struct TemporalSplit {
    pub train: Vec<Sample>,
    /// Drives early stopping and checkpoint selection.
    pub validation: Vec<Sample>,
    /// Never used for fitting; feeds external evaluation.
    pub holdout: Vec<Sample>,
}

/// Everything a fold trains and evaluates on.
#[derive(Debug, Clone)]
pub struct FoldData {
    pub stats: NormalizationStats,
    pub split: TemporalSplit,
    /// All anchors of the fold's own test stations.
    pub internal: Vec<Sample>,
    /// Hold-out anchors of other folds' test stations.
    pub external: Vec<Sample>,
    pub skipped: Vec<SkippedStation>,
    pub skipped_targets: usize,
    pub short_stations: Vec<StationId>,
}

/// Cut each station's samples in time: oldest → train, then validation, newest → hold-out.
///
/// Every station with at least one sample keeps at least one train sample.
pub fn partition_by_time(samples: Vec<Sample>, val_fraction: f64, holdout_fraction: f64) -> TemporalSplit {
    let mut by_station: BTreeMap<StationId, Vec<Sample>> = BTreeMap::new();
    for s in samples {
        by_station.entry(s.station_id).or_default().push(s);
    }

    let mut out = TemporalSplit::default();
    for (_, mut samples) in by_station {
        samples.sort_by_key(|s| s.anchor);
        let n = samples.len();
        let mut holdout = (n as f64 * holdout_fraction).round() as usize;
        let mut val = (n as f64 * val_fraction).round() as usize;
        while n > 0 && holdout + val >= n {
            if val > 0 {
                val -= 1;
            } else {
                holdout -= 1;
            }
        }
        let train_end = n - val - holdout;
        let val_end = train_end + val;

        let mut rest = samples.split_off(train_end);
        let tail = rest.split_off(val_end - train_end);
        out.train.extend(samples);
        out.validation.extend(rest);
        out.holdout.extend(tail);
    }
    out
}

/// Preprocess and window one fold.
///
/// `stats` comes from a checkpoint when evaluating; otherwise it is fitted on
/// the fold's train stations before anything is normalized.
pub fn prepare_fold(
    registry: &StationRegistry,
    split: &Split,
    external_ids: &BTreeSet<StationId>,
    config: &ExperimentConfig,
    stats: Option<NormalizationStats>,
) -> Result<FoldData, AppError> {
    let stats = match stats {
        Some(s) => s,
        None => fit_stats(registry, &split.train_station_ids, &config.preprocess)?,
    };

    let train_pre = preprocess_stations(registry, &split.train_station_ids, &config.preprocess, &stats)?;
    let test_pre = preprocess_stations(registry, &split.test_station_ids, &config.preprocess, &stats)?;
    debug!(
        fold = split.fold_index,
        cleaned = train_pre.cleaned + test_pre.cleaned,
        filled = train_pre.filled + test_pre.filled,
        "fold preprocessed"
    );

    let train_windows = sample_all(&train_pre.series, &config.preprocess, &config.window, &stats)?;
    let test_windows = sample_all(&test_pre.series, &config.preprocess, &config.window, &stats)?;

    let temporal = partition_by_time(
        train_windows.samples,
        config.train.val_fraction,
        config.train.holdout_fraction,
    );
    let external = temporal
        .holdout
        .iter()
        .filter(|s| external_ids.contains(&s.station_id))
        .cloned()
        .collect::<Vec<_>>();

    let mut skipped = train_pre.skipped;
    skipped.extend(test_pre.skipped);
    let mut short_stations = train_windows.short_stations;
    short_stations.extend(test_windows.short_stations);
    short_stations.sort_unstable();

    info!(
        fold = split.fold_index,
        train = temporal.train.len(),
        validation = temporal.validation.len(),
        internal = test_windows.samples.len(),
        external = external.len(),
        skipped_stations = skipped.len(),
        "fold samples ready"
    );

    Ok(FoldData {
        stats,
        split: temporal,
        internal: test_windows.samples,
        external,
        skipped,
        skipped_targets: train_windows.skipped_targets + test_windows.skipped_targets,
        short_stations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use nalgebra::DMatrix;

    fn samples(station_id: StationId, n: usize) -> Vec<Sample> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        (0..n)
            .map(|i| Sample {
                station_id,
                anchor: start + Duration::hours(i as i64),
                context: DMatrix::zeros(1, 1),
                targets: [None; 4],
            })
            .collect()
    }

    #[test]
    fn cut_is_chronological_per_station() {
        let mut all = samples(1, 10);
        all.extend(samples(2, 5));
        all.reverse();
        let split = partition_by_time(all, 0.2, 0.2);

        assert_eq!(split.train.len() + split.validation.len() + split.holdout.len(), 15);
        for station in [1, 2] {
            let last_train = split.train.iter().filter(|s| s.station_id == station).map(|s| s.anchor).max().unwrap();
            let first_val = split.validation.iter().filter(|s| s.station_id == station).map(|s| s.anchor).min();
            let first_hold = split.holdout.iter().filter(|s| s.station_id == station).map(|s| s.anchor).min();
            assert!(first_val.is_none_or(|v| v > last_train));
            assert!(first_hold.is_none_or(|h| h > last_train));
        }
        assert_eq!(split.holdout.iter().filter(|s| s.station_id == 1).count(), 2);
    }

    #[test]
    fn tiny_stations_keep_a_train_sample() {
        let split = partition_by_time(samples(3, 1), 0.5, 0.5);
        assert_eq!(split.train.len(), 1);
        assert!(split.validation.is_empty() && split.holdout.is_empty());
    }
}
