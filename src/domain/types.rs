//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during preprocessing and training
//! - persisted as split artifacts, checkpoints and reports
//! - reloaded later for evaluation without recomputation

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDateTime, Timelike};
use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Station identifier (CIMIS station numbers are small positive integers).
pub type StationId = u32;

/// Hourly sensor variable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Eto,
    Precip,
    SolarRadiation,
    VaporPressure,
    AirTemperature,
    RelativeHumidity,
    DewPoint,
    WindSpeed,
    WindDirection,
    SoilTemperature,
}

/// How a variable is scaled during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// `(x - mean) / std`
    ZScore,
    /// `(x - min) / (max - min)`
    MinMax,
}

impl Variable {
    pub const COUNT: usize = 10;

    pub const ALL: [Variable; Variable::COUNT] = [
        Variable::Eto,
        Variable::Precip,
        Variable::SolarRadiation,
        Variable::VaporPressure,
        Variable::AirTemperature,
        Variable::RelativeHumidity,
        Variable::DewPoint,
        Variable::WindSpeed,
        Variable::WindDirection,
        Variable::SoilTemperature,
    ];

    /// Position in a [`VarValues`] array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Accepted (lower-cased) CSV header names.
    ///
    /// The first entry is the CIMIS export name; the others cover the raw API
    /// item codes and plain snake_case names.
    pub fn column_aliases(self) -> &'static [&'static str] {
        match self {
            Variable::Eto => &["eto (mm)", "hly-asce-eto", "eto"],
            Variable::Precip => &["precip (mm)", "hly-precip", "precip"],
            Variable::SolarRadiation => &["sol rad (w/sq.m)", "hly-sol-rad", "solar_radiation"],
            Variable::VaporPressure => &["vap pres (kpa)", "hly-vap-pres", "vapor_pressure"],
            Variable::AirTemperature => &["air temp (c)", "hly-air-tmp", "air_temperature"],
            Variable::RelativeHumidity => &["rel hum (%)", "hly-rel-hum", "relative_humidity"],
            Variable::DewPoint => &["dew point (c)", "hly-dew-pnt", "dew_point"],
            Variable::WindSpeed => &["wind speed (m/s)", "hly-wind-spd", "wind_speed"],
            Variable::WindDirection => &["wind dir (0-360)", "hly-wind-dir", "wind_direction"],
            Variable::SoilTemperature => &["soil temp (c)", "hly-soil-tmp", "soil_temperature"],
        }
    }

    /// Accepted (lower-cased) QC flag column names.
    pub fn qc_aliases(self) -> &'static [&'static str] {
        match self {
            Variable::Eto => &["eto-qc", "hly-asce-eto-qc"],
            Variable::Precip => &["precip-qc", "hly-precip-qc"],
            Variable::SolarRadiation => &["solrad-qc", "hly-sol-rad-qc"],
            Variable::VaporPressure => &["vappres-qc", "hly-vap-pres-qc"],
            Variable::AirTemperature => &["airtmp-qc", "hly-air-tmp-qc"],
            Variable::RelativeHumidity => &["relhum-qc", "hly-rel-hum-qc"],
            Variable::DewPoint => &["dewpnt-qc", "hly-dew-pnt-qc"],
            Variable::WindSpeed => &["windspd-qc", "hly-wind-spd-qc"],
            Variable::WindDirection => &["winddir-qc", "hly-wind-dir-qc"],
            Variable::SoilTemperature => &["soiltmp-qc", "hly-soil-tmp-qc"],
        }
    }

    /// Relative humidity and wind direction live on a closed physical interval,
    /// so they are min-max scaled; everything else is z-scored.
    pub fn scaling(self) -> Scaling {
        match self {
            Variable::RelativeHumidity | Variable::WindDirection => Scaling::MinMax,
            _ => Scaling::ZScore,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Variable::Eto => "ETo",
            Variable::Precip => "Precip",
            Variable::SolarRadiation => "Sol Rad",
            Variable::VaporPressure => "Vap Pres",
            Variable::AirTemperature => "Air Temp",
            Variable::RelativeHumidity => "Rel Hum",
            Variable::DewPoint => "Dew Point",
            Variable::WindSpeed => "Wind Speed",
            Variable::WindDirection => "Wind Dir",
            Variable::SoilTemperature => "Soil Temp",
        }
    }
}

/// One value slot per [`Variable`]; `None` is the missing marker.
pub type VarValues = [Option<f64>; Variable::COUNT];

/// Meteorological season, derived from the calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub const COUNT: usize = 4;

    pub fn from_month(month: u32) -> Season {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A raw hourly observation as read from the input CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub values: VarValues,
}

impl Observation {
    pub fn missing(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            values: [None; Variable::COUNT],
        }
    }

    pub fn value(&self, variable: Variable) -> Option<f64> {
        self.values[variable.index()]
    }
}

/// Station metadata from the coordinate file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMeta {
    pub id: StationId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub county: Option<String>,
    pub active: Option<bool>,
}

/// A station with its raw hourly observations.
///
/// Invariant: observations are strictly increasing and evenly spaced at one
/// hour; gaps are represented by all-missing observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub meta: StationMeta,
    pub observations: Vec<Observation>,
}

impl Station {
    pub fn id(&self) -> StationId {
        self.meta.id
    }
}

/// How far a [`Series`] has progressed through preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Raw,
    Derived,
    Cleaned,
    Normalized,
    Imputed,
}

/// An hourly record with derived calendar features.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    /// Hour of day in `[0, 23]`.
    pub hour_of_day: u8,
    pub season: Season,
    pub values: VarValues,
    /// `true` where the value was filled by imputation.
    pub imputed: [bool; Variable::COUNT],
}

impl Record {
    pub fn from_observation(obs: &Observation) -> Self {
        Self {
            timestamp: obs.timestamp,
            hour_of_day: obs.timestamp.hour() as u8,
            season: Season::from_month(obs.timestamp.month()),
            values: obs.values,
            imputed: [false; Variable::COUNT],
        }
    }

    pub fn value(&self, variable: Variable) -> Option<f64> {
        self.values[variable.index()]
    }
}

/// A station's record sequence at some preprocessing stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub station_id: StationId,
    pub stage: Stage,
    pub records: Vec<Record>,
}

impl Series {
    pub fn raw(station: &Station) -> Self {
        Self {
            station_id: station.id(),
            stage: Stage::Raw,
            records: station
                .observations
                .iter()
                .map(Record::from_observation)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Supported forecast horizons in hours.
pub const HORIZONS: [u32; 4] = [3, 6, 12, 24];
pub const HORIZON_COUNT: usize = HORIZONS.len();

/// One value per supported horizon, in [`HORIZONS`] order.
pub type HorizonValues = [f64; HORIZON_COUNT];

/// The subset of [`HORIZONS`] a run is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<u32>", try_from = "Vec<u32>")]
pub struct HorizonSet {
    active: [bool; HORIZON_COUNT],
}

impl HorizonSet {
    pub fn all() -> Self {
        Self {
            active: [true; HORIZON_COUNT],
        }
    }

    pub fn from_hours(hours: &[u32]) -> Result<Self, String> {
        if hours.is_empty() {
            return Err("at least one horizon is required".to_string());
        }
        let mut active = [false; HORIZON_COUNT];
        for &h in hours {
            let slot = Self::slot_of(h)
                .ok_or_else(|| format!("horizon {h}h is not one of {HORIZONS:?}"))?;
            active[slot] = true;
        }
        Ok(Self { active })
    }

    /// Position of `hours` in [`HORIZONS`].
    pub fn slot_of(hours: u32) -> Option<usize> {
        HORIZONS.iter().position(|&h| h == hours)
    }

    pub fn contains(&self, hours: u32) -> bool {
        Self::slot_of(hours).is_some_and(|slot| self.active[slot])
    }

    /// `(slot, hours)` pairs for the active horizons, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        HORIZONS
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.active[*slot])
            .map(|(slot, &h)| (slot, h))
    }

    pub fn hours(&self) -> Vec<u32> {
        self.iter().map(|(_, h)| h).collect()
    }

    pub fn len(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_hours(&self) -> u32 {
        self.iter().map(|(_, h)| h).max().unwrap_or(0)
    }

    /// Compact label used in file names, e.g. `3-6-12-24`.
    pub fn label(&self) -> String {
        self.hours()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl From<HorizonSet> for Vec<u32> {
    fn from(value: HorizonSet) -> Self {
        value.hours()
    }
}

impl TryFrom<Vec<u32>> for HorizonSet {
    type Error = String;

    fn try_from(value: Vec<u32>) -> Result<Self, Self::Error> {
        HorizonSet::from_hours(&value)
    }
}

/// One fold of the spatial split.
///
/// Invariant: `train ∪ test` is the full station set and `train ∩ test = ∅`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub fold_index: usize,
    pub train_station_ids: BTreeSet<StationId>,
    pub test_station_ids: BTreeSet<StationId>,
}

/// Per-variable normalization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scaling", rename_all = "snake_case")]
pub enum ScalingParams {
    ZScore { mean: f64, std: f64 },
    MinMax { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableStats {
    pub variable: Variable,
    pub params: ScalingParams,
    /// Number of observed (non-missing) values the stats were computed from.
    pub count: usize,
}

/// Normalization statistics, computed once from the train stations of a fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    /// Stations the stats were computed from.
    pub source_station_ids: BTreeSet<StationId>,
    pub variables: Vec<VariableStats>,
}

impl NormalizationStats {
    pub fn get(&self, variable: Variable) -> Option<&VariableStats> {
        self.variables.iter().find(|s| s.variable == variable)
    }
}

/// Target for one horizon of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonTarget {
    pub hours: u32,
    /// Denormalized air temperature (°C) at `anchor + hours`.
    pub air_temperature: f64,
    /// Normalized air temperature (the regression target).
    pub normalized: f64,
    /// `air_temperature < 0.0` (strict).
    pub is_frost: bool,
}

/// A context window plus multi-horizon targets.
#[derive(Debug, Clone)]
pub struct Sample {
    pub station_id: StationId,
    /// Timestamp of the last context record.
    pub anchor: NaiveDateTime,
    /// `context_length × feature_count`, oldest row first.
    pub context: DMatrix<f64>,
    /// Indexed by [`HORIZONS`] slot; `None` for inactive horizons.
    pub targets: [Option<HorizonTarget>; HORIZON_COUNT],
}

impl Sample {
    /// Normalized target vector and its mask (inactive slots are zero/false).
    pub fn target_vector(&self) -> (HorizonValues, [bool; HORIZON_COUNT]) {
        let mut values = [0.0; HORIZON_COUNT];
        let mut mask = [false; HORIZON_COUNT];
        for (slot, target) in self.targets.iter().enumerate() {
            if let Some(t) = target {
                values[slot] = t.normalized;
                mask[slot] = true;
            }
        }
        (values, mask)
    }
}
