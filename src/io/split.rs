//! Read/write the split artifact.
//!
//! Once written, a split is reused verbatim by later runs so every fold sees
//! the same station assignment without recomputing MDS.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::StationId;
use crate::error::AppError;
use crate::split::SplitPlan;

pub const SPLIT_METHOD: &str = "mds-kfold";
pub const SPLIT_METRIC: &str = "haversine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitArtifact {
    pub tool: String,
    pub method: String,
    pub metric: String,
    #[serde(flatten)]
    pub plan: SplitPlan,
}

impl SplitArtifact {
    pub fn new(plan: SplitPlan) -> Self {
        Self {
            tool: "frost".to_string(),
            method: SPLIT_METHOD.to_string(),
            metric: SPLIT_METRIC.to_string(),
            plan,
        }
    }
}

pub fn write_split(path: &Path, plan: &SplitPlan) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create split file '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &SplitArtifact::new(plan.clone()))
        .map_err(|e| AppError::io(format!("Failed to write split JSON: {e}")))?;
    Ok(())
}

/// Read a split and check it partitions `stations`.
pub fn read_split(path: &Path, stations: &BTreeSet<StationId>) -> Result<SplitPlan, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open split file '{}': {e}", path.display())))?;
    let artifact: SplitArtifact = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::io(format!("Invalid split JSON '{}': {e}", path.display())))?;

    if artifact.method != SPLIT_METHOD {
        return Err(AppError::configuration(format!(
            "Split file uses method '{}', expected '{SPLIT_METHOD}'.",
            artifact.method
        )));
    }
    artifact.plan.validate(stations)?;
    Ok(artifact.plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StationMeta;
    use crate::split::split_stations;

    fn meta(id: StationId, lat: f64, lon: f64) -> StationMeta {
        StationMeta {
            id,
            name: format!("S{id}"),
            latitude: lat,
            longitude: lon,
            county: None,
            active: None,
        }
    }

    #[test]
    fn round_trip_and_validation() {
        let metas: Vec<StationMeta> = (0..6)
            .map(|i| meta(i + 1, 36.0 + f64::from(i) * 0.4, -121.0 + f64::from(i) * 0.2))
            .collect();
        let refs: Vec<&StationMeta> = metas.iter().collect();
        let plan = split_stations(&refs, 3).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.json");
        write_split(&path, &plan).unwrap();

        let ids: BTreeSet<StationId> = metas.iter().map(|m| m.id).collect();
        assert_eq!(read_split(&path, &ids).unwrap(), plan);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"method\": \"mds-kfold\""));

        // A registry with an extra station no longer matches the saved split.
        let mut more = ids.clone();
        more.insert(99);
        assert!(read_split(&path, &more).is_err());
    }
}
