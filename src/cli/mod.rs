//! Command-line parsing for the frost forecaster.
//!
//! Parsing and dispatch stay separate from the preprocessing and model code;
//! `app` turns these argument structs into explicit config values.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::Variable;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "frost",
    version,
    about = "Multi-horizon frost forecasting from hourly weather-station data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compute (or check) the spatial K-fold station split and write it as JSON.
    Split(SplitArgs),
    /// Train one fold (or all folds) and evaluate the best checkpoint.
    Train(TrainArgs),
    /// Evaluate a saved checkpoint without training.
    Evaluate(EvaluateArgs),
}

/// Where the station data comes from and where outputs go.
#[derive(Debug, Args, Clone)]
pub struct DataArgs {
    /// Hourly records: a CSV file or a directory of per-station CSV files.
    #[arg(long, env = "FROST_DATA", value_name = "PATH")]
    pub data: Option<PathBuf>,

    /// Station coordinate CSV (`Stn Id`, `Latitude`, `Longitude`, ...).
    #[arg(long, env = "FROST_STATIONS", value_name = "CSV")]
    pub stations: Option<PathBuf>,

    /// Output directory for the split, checkpoints and reports.
    #[arg(long, env = "FROST_OUT", default_value = "frost-out")]
    pub out: PathBuf,

    /// Use N generated stations instead of reading files.
    #[arg(long, value_name = "N", conflicts_with_all = ["data", "stations"])]
    pub synthetic: Option<usize>,

    /// Hours of generated data per synthetic station.
    #[arg(long, default_value_t = 24 * 90)]
    pub synthetic_hours: usize,

    /// Seed for synthetic data generation.
    #[arg(long, default_value_t = 42)]
    pub synthetic_seed: u64,

    /// Keep only stations in these counties (comma-separated, case-insensitive).
    #[arg(long = "county", value_delimiter = ',')]
    pub counties: Vec<String>,

    /// Drop stations marked inactive in the coordinate file.
    #[arg(long)]
    pub active_only: bool,

    /// QC flags whose values are treated as missing.
    #[arg(long, value_delimiter = ',', default_value = "M,R")]
    pub qc_reject: Vec<String>,

    /// Reuse this split file (written here when it does not exist yet).
    #[arg(long, value_name = "JSON")]
    pub split_file: Option<PathBuf>,

    /// JSON valid-range table overriding the built-in outlier limits.
    #[arg(long, value_name = "JSON")]
    pub valid_ranges: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SplitArgs {
    #[command(flatten)]
    pub data: DataArgs,
}

/// Preprocessing, windowing, model and optimizer settings.
#[derive(Debug, Args, Clone)]
pub struct ExperimentArgs {
    /// Sensor variables fed to the model (comma-separated); defaults to the standard set.
    #[arg(long, value_enum, value_delimiter = ',')]
    pub features: Vec<Variable>,

    /// Context length L in hours.
    #[arg(short = 'L', long, default_value_t = 24)]
    pub context_length: usize,

    /// Forecast horizons in hours (subset of 3,6,12,24).
    #[arg(long, value_delimiter = ',', default_value = "3,6,12,24")]
    pub horizons: Vec<u32>,

    /// Hours between consecutive anchors.
    #[arg(long, default_value_t = 1)]
    pub stride: usize,

    /// Report a single horizon only.
    #[arg(long)]
    pub pred_len: Option<u32>,

    #[arg(long, default_value_t = 32)]
    pub d_model: usize,

    #[arg(long, default_value_t = 4)]
    pub heads: usize,

    #[arg(long, default_value_t = 2)]
    pub layers: usize,

    #[arg(long, default_value_t = 64)]
    pub ff_dim: usize,

    /// Hidden width of the MLP decoder.
    #[arg(long, default_value_t = 32)]
    pub decoder_hidden: usize,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 30)]
    pub max_epochs: usize,

    /// Epochs without validation improvement before stopping (0 = never stop early).
    #[arg(long, default_value_t = 5)]
    pub patience: usize,

    #[arg(long = "lr", default_value_t = 1e-3)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 1e-4)]
    pub min_delta: f64,

    /// Global gradient-norm clip (0 disables).
    #[arg(long, default_value_t = 1.0)]
    pub clip_norm: f64,

    #[arg(long, default_value_t = 0.1)]
    pub val_fraction: f64,

    #[arg(long, default_value_t = 0.2)]
    pub holdout_fraction: f64,

    /// Seed for weight initialization and batch shuffling.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub experiment: ExperimentArgs,

    /// Fold to train (0, 1 or 2); all folds when omitted.
    #[arg(long)]
    pub fold: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Checkpoint written by `frost train`.
    #[arg(long, value_name = "JSON")]
    pub checkpoint: PathBuf,

    /// Report a single horizon only.
    #[arg(long)]
    pub pred_len: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn train_flags_parse() {
        let cli = Cli::try_parse_from([
            "frost", "train", "--synthetic", "6", "--fold", "1", "-L", "48", "--horizons", "3,6",
            "--features", "air-temperature,dew-point",
        ])
        .unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.data.synthetic, Some(6));
        assert_eq!(args.fold, Some(1));
        assert_eq!(args.experiment.context_length, 48);
        assert_eq!(args.experiment.horizons, vec![3, 6]);
        assert_eq!(
            args.experiment.features,
            vec![Variable::AirTemperature, Variable::DewPoint]
        );
        assert_eq!(args.data.qc_reject, vec!["M", "R"]);
    }

    #[test]
    fn synthetic_conflicts_with_files() {
        let parsed = Cli::try_parse_from([
            "frost", "split", "--synthetic", "6", "--data", "records.csv",
        ]);
        assert!(parsed.is_err());
    }
}
