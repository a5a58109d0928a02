//! Reporting: forecast metrics and formatted terminal output.

pub mod format;
pub mod metrics;

pub use format::{format_run_report, format_split};
pub use metrics::{evaluate_forecaster, horizon_metrics, score_predictions};
