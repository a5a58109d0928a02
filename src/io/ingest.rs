//! CSV ingest of hourly station records.
//!
//! This module turns one CIMIS-style hourly export (or a directory of them)
//! into per-station observation sequences on a contiguous hourly grid.
//!
//! Design goals:
//! - **Strict schema** for required fields (station id + date/hour or timestamp)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Lenient values**: missing markers, bad numbers and rejected QC flags
//!   become missing values, never errors
//! - **Deterministic behavior**: files in name order, first duplicate wins

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use csv::StringRecord;
use tracing::{debug, info};

use crate::domain::{Observation, StationId, Variable};
use crate::error::AppError;

const STATION_ALIASES: [&str; 4] = ["stn id", "stationid", "station_id", "station id"];
const DATE_ALIASES: [&str; 1] = ["date"];
const HOUR_ALIASES: [&str; 3] = ["hour (pst)", "hour", "hour_pst"];
const TIMESTAMP_ALIASES: [&str; 2] = ["timestamp", "datetime"];
const MISSING_MARKERS: [&str; 4] = ["m", "---", "####", "--"];

/// Ingest options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// QC flags (upper-case) whose values are dropped at ingest.
    pub qc_reject: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            qc_reject: vec!["M".to_string(), "R".to_string()],
        }
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub file: PathBuf,
    pub line: usize,
    pub station_id: Option<StationId>,
    pub message: String,
}

/// Ingest output: per-station hourly observations + row errors.
#[derive(Debug, Clone, Default)]
pub struct IngestedRecords {
    pub observations: HashMap<StationId, Vec<Observation>>,
    pub row_errors: Vec<RowError>,
    pub files: Vec<PathBuf>,
    pub rows_read: usize,
    pub rows_used: usize,
    /// Values dropped because of their QC flag.
    pub qc_rejected: usize,
    /// Hours inserted to close gaps in the hourly grid.
    pub gap_hours: usize,
}

/// Column positions resolved once per file.
#[derive(Debug, Clone)]
struct Schema {
    station: usize,
    time: TimeColumns,
    values: Vec<(Variable, usize, Option<usize>)>,
}

#[derive(Debug, Clone, Copy)]
enum TimeColumns {
    Timestamp(usize),
    DateHour { date: usize, hour: usize },
}

struct RawRow {
    file: usize,
    line: usize,
    observation: Observation,
}

/// Load a CSV file or every `*.csv` file in a directory.
pub fn load_records(path: &Path, config: &IngestConfig) -> Result<IngestedRecords, AppError> {
    let files = csv_files(path)?;
    let mut out = IngestedRecords {
        files: files.clone(),
        ..IngestedRecords::default()
    };
    let mut rows: BTreeMap<StationId, Vec<RawRow>> = BTreeMap::new();

    for (file_idx, file) in files.iter().enumerate() {
        read_file(file, file_idx, config, &mut rows, &mut out)?;
    }

    for (station_id, mut raw) in rows {
        // Stable sort: for duplicate timestamps the earliest row stays first.
        raw.sort_by_key(|r| r.observation.timestamp);
        let mut kept: Vec<Observation> = Vec::with_capacity(raw.len());
        for row in raw {
            if kept
                .last()
                .is_some_and(|prev| prev.timestamp == row.observation.timestamp)
            {
                out.row_errors.push(RowError {
                    file: files[row.file].clone(),
                    line: row.line,
                    station_id: Some(station_id),
                    message: format!("Duplicate timestamp {}", row.observation.timestamp),
                });
                continue;
            }
            kept.push(row.observation);
        }
        out.rows_used += kept.len();
        let (grid, gaps) = fill_hourly_grid(kept);
        out.gap_hours += gaps;
        out.observations.insert(station_id, grid);
    }

    if out.observations.is_empty() {
        return Err(AppError::insufficient_data(format!(
            "No valid rows found in '{}'.",
            path.display()
        )));
    }
    info!(
        files = out.files.len(),
        stations = out.observations.len(),
        rows_read = out.rows_read,
        rows_used = out.rows_used,
        row_errors = out.row_errors.len(),
        gap_hours = out.gap_hours,
        "records ingested"
    );
    Ok(out)
}

fn csv_files(path: &Path) -> Result<Vec<PathBuf>, AppError> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = fs::read_dir(path)
        .map_err(|e| AppError::io(format!("Failed to list '{}': {e}", path.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::io(format!("Failed to list '{}': {e}", path.display())))?;
        let p = entry.path();
        let is_csv = p
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if p.is_file() && is_csv {
            files.push(p);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(AppError::io(format!("No .csv files in directory '{}'.", path.display())));
    }
    Ok(files)
}

fn read_file(
    path: &Path,
    file_idx: usize,
    config: &IngestConfig,
    rows: &mut BTreeMap<StationId, Vec<RawRow>>,
    out: &mut IngestedRecords,
) -> Result<(), AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::io(format!("Failed to read CSV headers of '{}': {e}", path.display())))?
        .clone();
    let schema = resolve_schema(&headers).map_err(|msg| {
        AppError::configuration(format!("{}: {msg}", path.display()))
    })?;
    debug!(file = %path.display(), variables = schema.values.len(), "csv schema resolved");

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header; CSV lines are 1-based.
        let line = idx + 2;
        out.rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.row_errors.push(RowError {
                    file: path.to_path_buf(),
                    line,
                    station_id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &schema, config) {
            Ok((station_id, observation, rejected)) => {
                out.qc_rejected += rejected;
                rows.entry(station_id).or_default().push(RawRow {
                    file: file_idx,
                    line,
                    observation,
                });
            }
            Err((station_id, message)) => out.row_errors.push(RowError {
                file: path.to_path_buf(),
                line,
                station_id,
                message,
            }),
        }
    }
    Ok(())
}

fn resolve_schema(headers: &StringRecord) -> Result<Schema, String> {
    let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
    let header_map = build_header_map(&names);
    let find = |aliases: &[&str]| aliases.iter().find_map(|a| header_map.get(*a).copied());

    let station = find(&STATION_ALIASES)
        .ok_or_else(|| format!("Missing required column: one of {STATION_ALIASES:?}"))?;
    let time = match (find(&TIMESTAMP_ALIASES), find(&DATE_ALIASES), find(&HOUR_ALIASES)) {
        (Some(ts), _, _) => TimeColumns::Timestamp(ts),
        (None, Some(date), Some(hour)) => TimeColumns::DateHour { date, hour },
        _ => {
            return Err(
                "Missing required time columns: `timestamp`, or `date` + `hour (pst)`".to_string(),
            );
        }
    };

    let mut values = Vec::new();
    for v in Variable::ALL {
        let Some(idx) = find(v.column_aliases()) else { continue };
        // CIMIS exports name every flag column plain `qc`, right after its value.
        let qc = find(v.qc_aliases())
            .or_else(|| (names.get(idx + 1).map(String::as_str) == Some("qc")).then_some(idx + 1));
        values.push((v, idx, qc));
    }
    if !values.iter().any(|(v, _, _)| *v == Variable::AirTemperature) {
        return Err("Missing required column: air temperature (e.g. `Air Temp (C)`)".to_string());
    }
    Ok(Schema {
        station,
        time,
        values,
    })
}

fn build_header_map(names: &[String]) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (idx, name) in names.iter().enumerate() {
        // Keep the first occurrence (repeated `qc` headers resolve positionally).
        map.entry(name.clone()).or_insert(idx);
    }
    map
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Parse one row into `(station, observation, qc-rejected count)`.
fn parse_row(
    record: &StringRecord,
    schema: &Schema,
    config: &IngestConfig,
) -> Result<(StationId, Observation, usize), (Option<StationId>, String)> {
    let raw_id = get_field(record, schema.station).ok_or((None, "Missing station id".to_string()))?;
    let station_id: StationId = raw_id
        .parse()
        .map_err(|_| (None, format!("Invalid station id '{raw_id}'")))?;

    let timestamp = parse_time(record, schema.time).map_err(|e| (Some(station_id), e))?;
    let mut observation = Observation::missing(timestamp);
    let mut rejected = 0usize;

    for &(variable, idx, qc) in &schema.values {
        let value = parse_value(get_field(record, idx));
        if value.is_none() {
            continue;
        }
        let flag = qc.and_then(|q| get_field(record, q));
        if flag.is_some_and(|f| config.qc_reject.iter().any(|r| r.eq_ignore_ascii_case(f))) {
            rejected += 1;
            continue;
        }
        observation.values[variable.index()] = value;
    }
    Ok((station_id, observation, rejected))
}

fn get_field(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

/// Missing markers and non-numeric cells become `None`.
fn parse_value(s: Option<&str>) -> Option<f64> {
    let s = s?;
    if MISSING_MARKERS.iter().any(|m| s.eq_ignore_ascii_case(m)) {
        return None;
    }
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

fn parse_time(record: &StringRecord, columns: TimeColumns) -> Result<NaiveDateTime, String> {
    match columns {
        TimeColumns::Timestamp(idx) => {
            let s = get_field(record, idx).ok_or("Missing timestamp")?;
            let ts = parse_timestamp(s)?;
            if ts.minute() != 0 || ts.second() != 0 {
                return Err(format!("Timestamp '{s}' is not on the hour"));
            }
            Ok(ts)
        }
        TimeColumns::DateHour { date, hour } => {
            let d = parse_date(get_field(record, date).ok_or("Missing date")?)?;
            let h = parse_hour(get_field(record, hour).ok_or("Missing hour")?)?;
            let midnight = d.and_hms_opt(0, 0, 0).ok_or("Invalid date")?;
            Ok(midnight + Duration::hours(i64::from(h)))
        }
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    const FMTS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
    for fmt in FMTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ts);
        }
    }
    Err(format!("Invalid timestamp '{s}'. Expected YYYY-MM-DD HH:MM[:SS]."))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!("Invalid date '{s}'. Expected one of: YYYY-MM-DD, MM/DD/YYYY, YYYY/MM/DD."))
}

/// Hour of day, `0..=24`. Values of 100 and up are `HHMM` (`0100`..`2400`,
/// or `100`..`900` once a spreadsheet strips the leading zero); smaller values
/// are plain hours `0`..`24`. 24 means midnight of the following day.
fn parse_hour(s: &str) -> Result<u32, String> {
    let n: u32 = s.parse().map_err(|_| format!("Invalid hour '{s}'"))?;
    let hour = if n >= 100 {
        if n % 100 != 0 {
            return Err(format!("Hour '{s}' is not on the hour"));
        }
        n / 100
    } else {
        n
    };
    if hour > 24 {
        return Err(format!("Hour '{s}' out of range"));
    }
    Ok(hour)
}

/// Materialize missing hours so timestamps are strictly hourly.
fn fill_hourly_grid(observations: Vec<Observation>) -> (Vec<Observation>, usize) {
    let mut out: Vec<Observation> = Vec::with_capacity(observations.len());
    let mut gaps = 0usize;
    for obs in observations {
        if let Some(prev) = out.last().map(|o| o.timestamp) {
            let mut t = prev + Duration::hours(1);
            while t < obs.timestamp {
                out.push(Observation::missing(t));
                gaps += 1;
                t += Duration::hours(1);
            }
        }
        out.push(obs);
    }
    (out, gaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn hour_conventions() {
        assert_eq!(parse_hour("0100").unwrap(), 1);
        assert_eq!(parse_hour("2400").unwrap(), 24);
        assert_eq!(parse_hour("0").unwrap(), 0);
        assert_eq!(parse_hour("23").unwrap(), 23);
        assert_eq!(parse_hour("100").unwrap(), 1);
        assert_eq!(parse_hour("900").unwrap(), 9);
        assert_eq!(parse_hour("1200").unwrap(), 12);
        assert!(parse_hour("130").is_err());
        assert!(parse_hour("2500").is_err());
        assert!(parse_hour("0130").is_err());
        assert!(parse_hour("25").is_err());
    }

    #[test]
    fn missing_markers_are_none() {
        for s in ["M", "---", "####", "abc"] {
            assert_eq!(parse_value(Some(s)), None, "{s}");
        }
        assert_eq!(parse_value(Some("-1.5")), Some(-1.5));
        assert_eq!(parse_value(None), None);
    }

    #[test]
    fn cimis_export_with_positional_qc_columns() {
        let dir = tempfile::tempdir().unwrap();
        let body = "\u{feff}Stn Id,Stn Name,Date,Hour (PST),Air Temp (C),qc,Rel Hum (%),qc\n\
                    2,FivePoints,1/1/2024,2300,3.5,,80,\n\
                    2,FivePoints,1/1/2024,2400,2.0,R,81,\n\
                    2,FivePoints,1/2/2024,0200,M,M,82,Y\n\
                    x,Bad,1/2/2024,0300,1.0,,80,\n";
        let path = write_csv(dir.path(), "hourly.csv", body);
        let out = load_records(&path, &IngestConfig::default()).unwrap();

        assert_eq!(out.rows_read, 4);
        assert_eq!(out.row_errors.len(), 1);
        assert_eq!(out.row_errors[0].line, 5);
        assert_eq!(out.qc_rejected, 1);

        let obs = &out.observations[&2];
        let times: Vec<NaiveDateTime> = obs.iter().map(|o| o.timestamp).collect();
        // 23:00, 24:00 (= next-day 00:00), a filled 01:00 gap, 02:00.
        assert_eq!(times, vec![ts(2024, 1, 1, 23), ts(2024, 1, 2, 0), ts(2024, 1, 2, 1), ts(2024, 1, 2, 2)]);
        assert_eq!(out.gap_hours, 1);
        assert_eq!(obs[0].value(Variable::AirTemperature), Some(3.5));
        assert_eq!(obs[1].value(Variable::AirTemperature), None, "R flag rejects the value");
        assert_eq!(obs[1].value(Variable::RelativeHumidity), Some(81.0));
        assert_eq!(obs[3].value(Variable::AirTemperature), None);
    }

    #[test]
    fn directory_input_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "a.csv",
            "station_id,timestamp,air_temperature\n7,2024-03-01 00:00,1.0\n7,2024-03-01 01:00,2.0\n",
        );
        write_csv(
            dir.path(),
            "b.csv",
            "station_id,timestamp,air_temperature\n7,2024-03-01 01:00,9.0\n8,2024-03-01 00:00,4.0\n",
        );
        write_csv(dir.path(), "notes.txt", "ignored");

        let out = load_records(dir.path(), &IngestConfig::default()).unwrap();
        assert_eq!(out.files.len(), 2);
        assert_eq!(out.observations.len(), 2);
        let s7 = &out.observations[&7];
        assert_eq!(s7.len(), 2);
        assert_eq!(s7[1].value(Variable::AirTemperature), Some(2.0), "first row wins");
        assert_eq!(out.row_errors.len(), 1);
        assert!(out.row_errors[0].message.contains("Duplicate"));
    }

    #[test]
    fn off_the_hour_rows_are_row_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "mixed.csv",
            "station_id,timestamp,air_temperature\n\
             7,2024-03-01 00:00,1.0\n\
             7,2024-03-01 00:30,1.5\n\
             7,2024-03-01 01:00,2.0\n\
             8,2024-03-01 00:00,4.0\n\
             8,2024-03-01 01:00:15,4.5\n",
        );
        let out = load_records(&path, &IngestConfig::default()).unwrap();

        assert_eq!(out.row_errors.len(), 2);
        assert_eq!(out.row_errors[0].line, 3);
        assert_eq!(out.row_errors[0].station_id, Some(7));
        assert!(out.row_errors[0].message.contains("not on the hour"));

        let times: Vec<NaiveDateTime> = out.observations[&7].iter().map(|o| o.timestamp).collect();
        assert_eq!(times, vec![ts(2024, 3, 1, 0), ts(2024, 3, 1, 1)]);
        assert_eq!(out.observations[&8].len(), 1);
    }

    #[test]
    fn hours_without_leading_zero_load_as_hhmm() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "merged.csv",
            "Stn Id,Date,Hour (PST),Air Temp (C)\n\
             5,2024-01-01,100,1.0\n\
             5,2024-01-01,200,0.5\n\
             5,2024-01-01,900,3.0\n",
        );
        let out = load_records(&path, &IngestConfig::default()).unwrap();

        assert!(out.row_errors.is_empty());
        let obs = &out.observations[&5];
        assert_eq!(obs.len(), 9);
        assert_eq!(obs[0].timestamp, ts(2024, 1, 1, 1));
        assert_eq!(obs[8].timestamp, ts(2024, 1, 1, 9));
        assert_eq!(obs[8].value(Variable::AirTemperature), Some(3.0));
        assert_eq!(out.gap_hours, 6);
    }

    #[test]
    fn missing_time_columns_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "x.csv", "stn id,air temp (c)\n1,2.0\n");
        let err = load_records(&path, &IngestConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
