//! StationSplitter: spatially disjoint K-fold train/test assignment.
//!
//! Stations are ordered by Maximum Dissimilarity Sampling and dealt round-robin
//! into `k` test groups, so consecutive (mutually distant) picks land in
//! different folds and each fold's test stations are spread across the region.
//! With `k = 3` every fold holds out a third of the stations (2:1 ratio).

pub mod mds;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Split, StationId, StationMeta};
use crate::error::AppError;

pub use mds::{haversine_km, mds_order};

/// All folds of one spatial split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub k: usize,
    pub folds: Vec<Split>,
    /// Stations in MDS pick order (rank `r` is tested in fold `r % k`).
    pub mds_order: Vec<StationId>,
}

impl SplitPlan {
    pub fn fold(&self, fold_index: usize) -> Result<&Split, AppError> {
        self.folds.get(fold_index).ok_or_else(|| {
            AppError::configuration(format!(
                "Fold index {fold_index} out of range (split has {} folds).",
                self.folds.len()
            ))
        })
    }

    /// Test stations of every other fold (the external evaluation set).
    pub fn external_test_ids(&self, fold_index: usize) -> BTreeSet<StationId> {
        self.folds
            .iter()
            .filter(|f| f.fold_index != fold_index)
            .flat_map(|f| f.test_station_ids.iter().copied())
            .collect()
    }

    /// Check the partition invariants against a station set.
    pub fn validate(&self, stations: &BTreeSet<StationId>) -> Result<(), AppError> {
        if self.folds.len() != self.k {
            return Err(AppError::invalid_input(format!(
                "Split declares k={} but has {} folds.",
                self.k,
                self.folds.len()
            )));
        }
        let mut tested = BTreeSet::new();
        for (i, fold) in self.folds.iter().enumerate() {
            if fold.fold_index != i {
                return Err(AppError::invalid_input(format!(
                    "Fold at position {i} has fold_index {}.",
                    fold.fold_index
                )));
            }
            if !fold.train_station_ids.is_disjoint(&fold.test_station_ids) {
                return Err(AppError::invalid_input(format!(
                    "Fold {i}: train and test stations overlap."
                )));
            }
            let union: BTreeSet<StationId> = fold
                .train_station_ids
                .union(&fold.test_station_ids)
                .copied()
                .collect();
            if &union != stations {
                return Err(AppError::invalid_input(format!(
                    "Fold {i}: train ∪ test does not match the station set."
                )));
            }
            if fold.test_station_ids.is_empty() || fold.train_station_ids.is_empty() {
                return Err(AppError::insufficient_stations(format!(
                    "Fold {i} has an empty train or test group."
                )));
            }
            if !tested.is_disjoint(&fold.test_station_ids) {
                return Err(AppError::invalid_input(format!(
                    "Fold {i}: test stations repeat across folds."
                )));
            }
            tested.extend(fold.test_station_ids.iter().copied());
        }
        Ok(())
    }
}

/// Partition `stations` into `k` spatially disjoint folds.
///
/// Fails with `InsufficientStations` when fewer than `k` stations exist (some
/// test group would be empty).
pub fn split_stations(stations: &[&StationMeta], k: usize) -> Result<SplitPlan, AppError> {
    if k < 2 {
        return Err(AppError::configuration(format!("K-fold split needs k >= 2 (got {k}).")));
    }
    if stations.len() < k {
        return Err(AppError::insufficient_stations(format!(
            "Need at least {k} stations for {k} non-empty folds, found {}.",
            stations.len()
        )));
    }
    for s in stations {
        let valid = s.latitude.is_finite()
            && s.longitude.is_finite()
            && (-90.0..=90.0).contains(&s.latitude)
            && (-180.0..=180.0).contains(&s.longitude);
        if !valid {
            return Err(AppError::invalid_input(format!(
                "Station {} has invalid coordinates ({}, {}).",
                s.id, s.latitude, s.longitude
            )));
        }
    }

    let mut sorted: Vec<&StationMeta> = stations.to_vec();
    sorted.sort_by_key(|s| s.id);
    if sorted.windows(2).any(|w| w[0].id == w[1].id) {
        return Err(AppError::invalid_input("Duplicate station ids in split input."));
    }

    let order = mds_order(&sorted);
    let all: BTreeSet<StationId> = order.iter().copied().collect();

    let mut test_groups = vec![BTreeSet::new(); k];
    for (rank, &id) in order.iter().enumerate() {
        test_groups[rank % k].insert(id);
    }

    let folds: Vec<Split> = test_groups
        .into_iter()
        .enumerate()
        .map(|(fold_index, test)| Split {
            fold_index,
            train_station_ids: all.difference(&test).copied().collect(),
            test_station_ids: test,
        })
        .collect();

    for f in &folds {
        debug!(
            fold = f.fold_index,
            train = f.train_station_ids.len(),
            test = f.test_station_ids.len(),
            "fold assigned"
        );
    }

    let plan = SplitPlan {
        k,
        folds,
        mds_order: order,
    };
    plan.validate(&all)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn grid(n: u32) -> Vec<StationMeta> {
        (0..n)
            .map(|i| StationMeta {
                id: 100 + i,
                name: format!("S{i}"),
                latitude: 36.0 + (i % 4) as f64 * 0.5,
                longitude: -121.0 + (i / 4) as f64 * 0.5,
                county: None,
                active: Some(true),
            })
            .collect()
    }

    #[test]
    fn folds_partition_every_station() {
        let stations = grid(12);
        let refs: Vec<&StationMeta> = stations.iter().collect();
        let plan = split_stations(&refs, 3).unwrap();
        let all: BTreeSet<StationId> = stations.iter().map(|s| s.id).collect();

        assert_eq!(plan.folds.len(), 3);
        for fold in &plan.folds {
            assert!(fold.train_station_ids.is_disjoint(&fold.test_station_ids));
            let union: BTreeSet<_> = fold
                .train_station_ids
                .union(&fold.test_station_ids)
                .copied()
                .collect();
            assert_eq!(union, all);
            // 2:1 train:test.
            assert_eq!(fold.test_station_ids.len(), 4);
            assert_eq!(fold.train_station_ids.len(), 8);
        }
    }

    #[test]
    fn test_groups_are_disjoint_across_folds() {
        let stations = grid(10);
        let refs: Vec<&StationMeta> = stations.iter().collect();
        let plan = split_stations(&refs, 3).unwrap();
        let total: usize = plan.folds.iter().map(|f| f.test_station_ids.len()).sum();
        assert_eq!(total, 10);
        let external = plan.external_test_ids(0);
        assert!(external.is_disjoint(&plan.folds[0].test_station_ids));
    }

    #[test]
    fn split_is_deterministic_regardless_of_input_order() {
        let stations = grid(9);
        let mut refs: Vec<&StationMeta> = stations.iter().collect();
        let a = split_stations(&refs, 3).unwrap();
        refs.reverse();
        let b = split_stations(&refs, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_stations_is_insufficient() {
        let stations = grid(2);
        let refs: Vec<&StationMeta> = stations.iter().collect();
        let err = split_stations(&refs, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStations);
    }
}
