//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - station data (`Station`, `Observation`, `Record`, `Series`)
//! - spatial folds (`Split`) and normalization statistics
//! - windowed samples and the supported horizon set
//! - explicit run configuration (`config`)
//! - checkpoint and report file schemas (`artifacts`)

pub mod artifacts;
pub mod config;
pub mod types;

pub use artifacts::*;
pub use config::*;
pub use types::*;
