//! Shared pipeline steps used by every subcommand.
//!
//! Keeping these in one place avoids duplicating the common workflow:
//! records + coordinates (or synthetic data) -> registry -> split -> reports.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::cli::DataArgs;
use crate::data::{SyntheticConfig, generate_stations};
use crate::domain::{FOLD_COUNT, RunReport, ValidRangeTable};
use crate::error::AppError;
use crate::io::{
    IngestConfig, StationFilter, load_records, load_stations, read_split, write_metrics_csv,
    write_report_json, write_split,
};
use crate::registry::StationRegistry;
use crate::split::{SplitPlan, split_stations};

/// Row errors logged individually before only the total is reported.
const ROW_ERROR_LOG_LIMIT: usize = 20;

/// Build the station registry from files or from generated data.
pub fn load_registry(args: &DataArgs) -> Result<StationRegistry, AppError> {
    if let Some(count) = args.synthetic {
        let start = NaiveDate::from_ymd_opt(2023, 11, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| AppError::configuration("Invalid synthetic start date."))?;
        let stations = generate_stations(&SyntheticConfig {
            stations: count,
            hours: args.synthetic_hours,
            start,
            missing_rate: 0.01,
            seed: args.synthetic_seed,
        })?;
        info!(stations = stations.len(), hours = args.synthetic_hours, "synthetic stations generated");
        return StationRegistry::new(stations);
    }

    let data = args.data.as_deref().ok_or_else(|| {
        AppError::configuration("No hourly records given (use --data, FROST_DATA or --synthetic).")
    })?;
    let coords = args.stations.as_deref().ok_or_else(|| {
        AppError::configuration("No station coordinates given (use --stations or FROST_STATIONS).")
    })?;

    let filter = StationFilter {
        counties: args.counties.clone(),
        active_only: args.active_only,
    };
    let loaded = load_stations(coords, &filter)?;
    for (line, message) in &loaded.row_errors {
        warn!(line, "station file: {message}");
    }

    let ingest = IngestConfig {
        qc_reject: args.qc_reject.iter().map(|f| f.trim().to_ascii_uppercase()).collect(),
    };
    let records = load_records(data, &ingest)?;
    for e in records.row_errors.iter().take(ROW_ERROR_LOG_LIMIT) {
        warn!(
            file = %e.file.display(),
            line = e.line,
            station = ?e.station_id,
            "row skipped: {}",
            e.message
        );
    }
    if records.row_errors.len() > ROW_ERROR_LOG_LIMIT {
        warn!(total = records.row_errors.len(), "more row errors not shown");
    }

    let joined = StationRegistry::join(loaded.stations, records.observations)?;
    if !joined.missing_coordinates.is_empty() {
        warn!(
            stations = ?joined.missing_coordinates,
            "stations without coordinates dropped"
        );
    }
    if !joined.missing_records.is_empty() {
        warn!(stations = ?joined.missing_records, "stations without records dropped");
    }
    info!(
        stations = joined.registry.len(),
        rows = records.rows_used,
        qc_rejected = records.qc_rejected,
        gap_hours = records.gap_hours,
        "station registry ready"
    );
    Ok(joined.registry)
}

/// Reuse an existing split file or compute and write a new one.
pub fn load_or_create_split(
    registry: &StationRegistry,
    args: &DataArgs,
) -> Result<(SplitPlan, PathBuf), AppError> {
    let path = args
        .split_file
        .clone()
        .unwrap_or_else(|| crate::app::default_split_path(&args.out));

    if path.exists() {
        let plan = read_split(&path, &registry.ids())?;
        info!(path = %path.display(), "split loaded");
        return Ok((plan, path));
    }

    let plan = split_stations(&registry.metas(), FOLD_COUNT)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    write_split(&path, &plan)?;
    info!(path = %path.display(), "split written");
    Ok((plan, path))
}

/// Built-in outlier limits, or a JSON override.
pub fn load_valid_ranges(path: Option<&Path>) -> Result<ValidRangeTable, AppError> {
    let Some(path) = path else {
        return Ok(ValidRangeTable::default());
    };
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open valid-range file '{}': {e}", path.display())))?;
    let table: ValidRangeTable = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        AppError::configuration(format!("Invalid valid-range JSON '{}': {e}", path.display()))
    })?;
    table.validate()?;
    Ok(table)
}

/// Print the report and write `report.json` + `metrics.csv` under `out`.
pub fn publish(report: &RunReport, out: &Path) -> Result<(), AppError> {
    println!("{}", crate::report::format_run_report(report));
    write_report_json(&out.join("report.json"), report)?;
    write_metrics_csv(&out.join("metrics.csv"), report)?;
    info!(out = %out.display(), "report written");
    Ok(())
}
