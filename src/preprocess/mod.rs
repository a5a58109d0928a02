//! SeriesPreprocessor: derive → clean → normalize → impute.
//!
//! Each stage is a pure function from one [`Series`] to the next and records
//! its progress in `Series::stage`; a stage that has already been applied is a
//! no-op. Running the pipeline on its own output therefore returns it
//! unchanged.
//!
//! Stations are independent, so both the stats pass and the full pipeline run
//! on the rayon pool. Normalization stats must be complete before any station
//! is normalized; [`fit_stats`] returns them by value, which is the barrier.

pub mod clean;
pub mod derive;
pub mod impute;
pub mod normalize;

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{NormalizationStats, PreprocessConfig, Series, Station, StationId, Variable};
use crate::error::{AppError, ErrorKind};
use crate::registry::StationRegistry;

pub use clean::clean;
pub use derive::derive;
pub use impute::{Imputed, impute};
pub use normalize::{compute_stats, denormalize_value, normalize, normalize_value};

/// A station dropped from windowing, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SkippedStation {
    pub station_id: StationId,
    pub reason: String,
}

/// Per-station preprocessing result.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub series: Series,
    pub cleaned: usize,
    pub filled: usize,
}

/// Output of preprocessing a group of stations.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOutput {
    /// Fully imputed series, ascending station id.
    pub series: Vec<Series>,
    pub skipped: Vec<SkippedStation>,
    pub cleaned: usize,
    pub filled: usize,
}

/// Derive + clean a raw station (input of the stats reduction).
pub fn cleaned_series(station: &Station, config: &PreprocessConfig) -> Series {
    let (series, _) = clean(derive(Series::raw(station)), &config.valid_ranges);
    series
}

/// Compute normalization stats from the given train stations only.
pub fn fit_stats(
    registry: &StationRegistry,
    train_ids: &BTreeSet<StationId>,
    config: &PreprocessConfig,
) -> Result<NormalizationStats, AppError> {
    let stations: Vec<&Station> = registry.select(train_ids).collect();
    if stations.is_empty() {
        return Err(AppError::insufficient_stations(
            "No train stations available to compute normalization stats.",
        ));
    }
    let cleaned: Vec<Series> = stations
        .par_iter()
        .map(|s| cleaned_series(s, config))
        .collect();
    compute_stats(&cleaned, &config.features)
}

/// Run the full pipeline on one series.
///
/// Fails with `UnrecoverableSeries` when a model feature is missing over the
/// whole series.
pub fn preprocess_series(
    series: Series,
    config: &PreprocessConfig,
    stats: &NormalizationStats,
) -> Result<Prepared, AppError> {
    let station_id = series.station_id;
    let series = derive(series);
    let (series, cleaned) = clean(series, &config.valid_ranges);
    let series = normalize(series, stats)?;
    let Imputed {
        series,
        unrecoverable,
        filled,
    } = impute(series);

    let lost: Vec<Variable> = unrecoverable
        .into_iter()
        .filter(|v| config.features.contains(v))
        .collect();
    if !lost.is_empty() {
        let names: Vec<&str> = lost.iter().map(|v| v.display_name()).collect();
        return Err(AppError::unrecoverable_series(format!(
            "Station {station_id}: no observed values for {}.",
            names.join(", ")
        )));
    }

    Ok(Prepared {
        series,
        cleaned,
        filled,
    })
}

/// Preprocess a set of stations with fixed stats.
///
/// Unrecoverable stations are skipped and reported; any other failure aborts.
pub fn preprocess_stations(
    registry: &StationRegistry,
    ids: &BTreeSet<StationId>,
    config: &PreprocessConfig,
    stats: &NormalizationStats,
) -> Result<PreprocessOutput, AppError> {
    let stations: Vec<&Station> = registry.select(ids).collect();
    let results: Vec<(StationId, Result<Prepared, AppError>)> = stations
        .par_iter()
        .map(|s| (s.id(), preprocess_series(Series::raw(s), config, stats)))
        .collect();

    let mut out = PreprocessOutput::default();
    for (station_id, result) in results {
        match result {
            Ok(prepared) => {
                debug!(
                    station = station_id,
                    cleaned = prepared.cleaned,
                    filled = prepared.filled,
                    "station preprocessed"
                );
                out.cleaned += prepared.cleaned;
                out.filled += prepared.filled;
                out.series.push(prepared.series);
            }
            Err(e) if e.kind() == ErrorKind::UnrecoverableSeries => {
                warn!(station = station_id, "skipping station: {}", e.message());
                out.skipped.push(SkippedStation {
                    station_id,
                    reason: e.message().to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
