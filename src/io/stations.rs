//! Station coordinate file: id → name, latitude, longitude (+ county, active).

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::info;

use crate::domain::{StationId, StationMeta};
use crate::error::AppError;

/// Which stations to keep from the coordinate file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationFilter {
    /// Keep only these counties (case-insensitive); empty keeps all.
    pub counties: Vec<String>,
    pub active_only: bool,
}

impl StationFilter {
    pub fn accepts(&self, meta: &StationMeta) -> bool {
        if self.active_only && meta.active == Some(false) {
            return false;
        }
        if self.counties.is_empty() {
            return true;
        }
        meta.county
            .as_deref()
            .is_some_and(|c| self.counties.iter().any(|want| want.eq_ignore_ascii_case(c)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedStations {
    /// Ascending station id.
    pub stations: Vec<StationMeta>,
    pub filtered_out: usize,
    pub row_errors: Vec<(usize, String)>,
}

pub fn load_stations(path: &Path, filter: &StationFilter) -> Result<LoadedStations, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open station file '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| AppError::io(format!("Failed to read station file headers: {e}")))?
        .clone();
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase(), i))
        .collect();
    let col = |aliases: &[&str]| aliases.iter().find_map(|a| header_map.get(*a).copied());

    let id_col = col(&["stn id", "stationid", "station_id", "station id"])
        .ok_or_else(|| AppError::configuration("Station file: missing `Stn Id` column."))?;
    let lat_col = col(&["latitude", "lat", "hmslatitude"])
        .ok_or_else(|| AppError::configuration("Station file: missing `Latitude` column."))?;
    let lon_col = col(&["longitude", "lon", "lng", "hmslongitude"])
        .ok_or_else(|| AppError::configuration("Station file: missing `Longitude` column."))?;
    let name_col = col(&["stn name", "name", "station_name"]);
    let county_col = col(&["county"]);
    let active_col = col(&["active", "isactive", "is_active"]);

    let mut out = LoadedStations::default();
    let mut seen = BTreeSet::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.row_errors.push((line, format!("CSV parse error: {e}")));
                continue;
            }
        };
        let parsed = parse_station(&record, id_col, lat_col, lon_col, name_col, county_col, active_col);
        match parsed {
            Ok(meta) if !seen.insert(meta.id) => {
                out.row_errors.push((line, format!("Duplicate station id {}", meta.id)));
            }
            Ok(meta) if !filter.accepts(&meta) => out.filtered_out += 1,
            Ok(meta) => out.stations.push(meta),
            Err(e) => out.row_errors.push((line, e)),
        }
    }
    out.stations.sort_by_key(|m| m.id);

    if out.stations.is_empty() {
        return Err(AppError::insufficient_stations(format!(
            "No usable stations in '{}' after filtering.",
            path.display()
        )));
    }
    info!(
        stations = out.stations.len(),
        filtered_out = out.filtered_out,
        row_errors = out.row_errors.len(),
        "station coordinates loaded"
    );
    Ok(out)
}

fn parse_station(
    record: &StringRecord,
    id_col: usize,
    lat_col: usize,
    lon_col: usize,
    name_col: Option<usize>,
    county_col: Option<usize>,
    active_col: Option<usize>,
) -> Result<StationMeta, String> {
    let field = |i: usize| record.get(i).map(str::trim).filter(|s| !s.is_empty());

    let raw_id = field(id_col).ok_or("Missing station id")?;
    let id: StationId = raw_id.parse().map_err(|_| format!("Invalid station id '{raw_id}'"))?;
    let latitude = parse_coordinate(field(lat_col).ok_or("Missing latitude")?)?;
    let longitude = parse_coordinate(field(lon_col).ok_or("Missing longitude")?)?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("Coordinates out of range ({latitude}, {longitude})"));
    }

    Ok(StationMeta {
        id,
        name: name_col.and_then(field).unwrap_or_default().to_string(),
        latitude,
        longitude,
        county: county_col.and_then(field).map(str::to_string),
        active: active_col.and_then(field).and_then(parse_bool),
    })
}

/// Decimal degrees; `"36º20'10N / 36.336222"` style values use the decimal part.
fn parse_coordinate(s: &str) -> Result<f64, String> {
    let decimal = s.rsplit('/').next().unwrap_or(s).trim();
    decimal
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Invalid coordinate '{s}'"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "active" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "inactive" => Some(false),
        _ => None,
    }
}
