//! Maximum Dissimilarity Sampling over station coordinates.
//!
//! Dissimilarity is the great-circle (haversine) distance in kilometres. The
//! first pick is the station with the largest total distance to all others;
//! each later pick maximizes its minimum distance to the already-picked set.
//! Ties go to the lower station id, so the order is fully reproducible.

use rayon::prelude::*;

use crate::domain::{StationId, StationMeta};

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two `(latitude, longitude)` points in km.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Pairwise distance matrix, rows in the order of `stations`.
fn distance_matrix(stations: &[&StationMeta]) -> Vec<Vec<f64>> {
    stations
        .par_iter()
        .map(|a| {
            stations
                .iter()
                .map(|b| haversine_km((a.latitude, a.longitude), (b.latitude, b.longitude)))
                .collect()
        })
        .collect()
}

/// Order stations by Maximum Dissimilarity Sampling.
///
/// `stations` must be sorted by ascending id; ties resolve to the earlier entry.
pub fn mds_order(stations: &[&StationMeta]) -> Vec<StationId> {
    let n = stations.len();
    if n == 0 {
        return Vec::new();
    }
    let dist = distance_matrix(stations);

    // Seed: the most isolated station overall.
    let mut seed = 0;
    let mut seed_score = f64::NEG_INFINITY;
    for (i, row) in dist.iter().enumerate() {
        let score: f64 = row.iter().sum();
        if score > seed_score {
            seed = i;
            seed_score = score;
        }
    }

    let mut picked = vec![false; n];
    let mut min_dist = dist[seed].clone();
    let mut order = Vec::with_capacity(n);
    picked[seed] = true;
    order.push(stations[seed].id);

    while order.len() < n {
        let mut best: Option<usize> = None;
        for i in 0..n {
            if picked[i] {
                continue;
            }
            // Strict `>` keeps the lowest id on equal scores.
            if best.is_none_or(|b| min_dist[i] > min_dist[b]) {
                best = Some(i);
            }
        }
        let Some(next) = best else { break };

        picked[next] = true;
        order.push(stations[next].id);
        for j in 0..n {
            min_dist[j] = min_dist[j].min(dist[next][j]);
        }
    }

    order
}
