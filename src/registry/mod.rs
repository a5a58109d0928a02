//! StationRegistry: station metadata plus raw hourly observations.
//!
//! The registry is a read-only data holder once built. Preprocessing never
//! mutates it; every stage produces a new [`Series`](crate::domain::Series).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Duration;

use crate::domain::{Observation, Station, StationId, StationMeta};
use crate::error::AppError;

#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: BTreeMap<StationId, Station>,
}

/// Result of joining coordinates with observations.
#[derive(Debug, Clone)]
pub struct JoinedRegistry {
    pub registry: StationRegistry,
    /// Stations with observations but no coordinates.
    pub missing_coordinates: Vec<StationId>,
    /// Stations with coordinates but no observations.
    pub missing_records: Vec<StationId>,
}

impl StationRegistry {
    /// Build a registry, validating the hourly-grid invariant per station.
    pub fn new(stations: Vec<Station>) -> Result<Self, AppError> {
        let mut map = BTreeMap::new();
        for station in stations {
            validate_hourly(&station)?;
            let id = station.id();
            if map.insert(id, station).is_some() {
                return Err(AppError::invalid_input(format!("Duplicate station id {id}.")));
            }
        }
        Ok(Self { stations: map })
    }

    /// Join coordinate metadata with per-station observations.
    ///
    /// Only stations present in both inputs are kept; the rest are reported.
    pub fn join(
        metas: Vec<StationMeta>,
        mut observations: HashMap<StationId, Vec<Observation>>,
    ) -> Result<JoinedRegistry, AppError> {
        let mut stations = Vec::new();
        let mut missing_records = Vec::new();
        for meta in metas {
            match observations.remove(&meta.id) {
                Some(obs) if !obs.is_empty() => stations.push(Station {
                    meta,
                    observations: obs,
                }),
                _ => missing_records.push(meta.id),
            }
        }
        let mut missing_coordinates: Vec<StationId> = observations.into_keys().collect();
        missing_coordinates.sort_unstable();
        missing_records.sort_unstable();

        Ok(JoinedRegistry {
            registry: Self::new(stations)?,
            missing_coordinates,
            missing_records,
        })
    }

    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.stations.get(&id)
    }

    pub fn ids(&self) -> BTreeSet<StationId> {
        self.stations.keys().copied().collect()
    }

    /// Stations in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn metas(&self) -> Vec<&StationMeta> {
        self.stations.values().map(|s| &s.meta).collect()
    }

    /// Stations whose ids are in `ids`, ascending.
    pub fn select<'a>(&'a self, ids: &'a BTreeSet<StationId>) -> impl Iterator<Item = &'a Station> {
        ids.iter().filter_map(|id| self.stations.get(id))
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

fn validate_hourly(station: &Station) -> Result<(), AppError> {
    for pair in station.observations.windows(2) {
        if pair[1].timestamp - pair[0].timestamp != Duration::hours(1) {
            return Err(AppError::invalid_input(format!(
                "Station {}: observations are not on a contiguous hourly grid at {} -> {}.",
                station.id(),
                pair[0].timestamp,
                pair[1].timestamp
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn meta(id: StationId) -> StationMeta {
        StationMeta {
            id,
            name: format!("S{id}"),
            latitude: 38.0,
            longitude: -121.0,
            county: None,
            active: Some(true),
        }
    }

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn rejects_non_contiguous_observations() {
        let station = Station {
            meta: meta(1),
            observations: vec![Observation::missing(ts(0)), Observation::missing(ts(2))],
        };
        assert!(StationRegistry::new(vec![station]).is_err());
    }

    #[test]
    fn join_reports_unmatched_stations() {
        let mut obs = HashMap::new();
        obs.insert(1, vec![Observation::missing(ts(0))]);
        obs.insert(9, vec![Observation::missing(ts(0))]);

        let joined = StationRegistry::join(vec![meta(1), meta(2)], obs).unwrap();
        assert_eq!(joined.registry.ids().into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(joined.missing_coordinates, vec![9]);
        assert_eq!(joined.missing_records, vec![2]);
    }
}
