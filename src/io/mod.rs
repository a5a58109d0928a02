//! Input/output helpers.
//!
//! - CIMIS-style hourly CSV ingest (`ingest`)
//! - station coordinate file (`stations`)
//! - split artifact JSON (`split`)
//! - model checkpoints (`checkpoint`)
//! - report exports (JSON/CSV) (`export`)

pub mod checkpoint;
pub mod export;
pub mod ingest;
pub mod split;
pub mod stations;

pub use checkpoint::{checkpoint_file_name, checkpoint_path, read_checkpoint, write_checkpoint};
pub use export::{write_metrics_csv, write_report_json};
pub use ingest::{IngestConfig, IngestedRecords, RowError, load_records};
pub use split::{SplitArtifact, read_split, write_split};
pub use stations::{LoadedStations, StationFilter, load_stations};
