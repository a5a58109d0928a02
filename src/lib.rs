//! `frost-forecast` library crate.
//!
//! The binary (`frost`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning processes
//! - each stage (registry, split, preprocessing, windowing, model, training)
//!   can be driven on its own from tests or other front-ends

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod models;
pub mod preprocess;
pub mod registry;
pub mod report;
pub mod split;
pub mod train;
pub mod window;
