//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real entry point that:
//! - loads `.env` and installs logging
//! - parses CLI arguments into explicit config values
//! - dispatches to split / train / evaluate
//! - prints reports and writes exports

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{Cli, Command, EvaluateArgs, ExperimentArgs, SplitArgs, TrainArgs};
use crate::domain::{
    DEFAULT_FEATURES, ExperimentConfig, FOLD_COUNT, HorizonSet, ModelConfig, PreprocessConfig,
    TrainConfig, ValidRangeTable, WindowConfig,
};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `frost` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Split(args) => handle_split(args),
        Command::Train(args) => handle_train(args),
        Command::Evaluate(args) => handle_evaluate(args),
    }
}

/// Logs go to stderr so stdout carries only reports.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frost_forecast=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn handle_split(args: SplitArgs) -> Result<(), AppError> {
    let registry = pipeline::load_registry(&args.data)?;
    let (plan, path) = pipeline::load_or_create_split(&registry, &args.data)?;
    println!("{}", crate::report::format_split(&plan, &registry));
    info!(path = %path.display(), "split ready");
    Ok(())
}

fn handle_train(args: TrainArgs) -> Result<(), AppError> {
    let valid_ranges = pipeline::load_valid_ranges(args.data.valid_ranges.as_deref())?;
    let base = experiment_config(&args.experiment, args.fold.unwrap_or(0), valid_ranges)?;

    let registry = pipeline::load_registry(&args.data)?;
    let (plan, _) = pipeline::load_or_create_split(&registry, &args.data)?;
    let checkpoint_dir = args.data.out.join("checkpoints");

    let report = match args.fold {
        // A single requested fold reports its own failure through the exit code.
        Some(fold) => {
            let fold_report = crate::train::run_fold(&registry, &plan, &base, &checkpoint_dir)
                .map_err(|e| AppError::new(e.kind(), format!("Fold {fold}: {}", e.message())))?;
            crate::domain::RunReport {
                tool: "frost".to_string(),
                folds: vec![fold_report],
                failures: Vec::new(),
            }
        }
        None => {
            let folds: Vec<usize> = (0..FOLD_COUNT).collect();
            crate::train::run_folds(&registry, &plan, &base, &folds, &checkpoint_dir)?
        }
    };

    pipeline::publish(&report, &args.data.out)?;
    if report.folds.is_empty() {
        return Err(AppError::insufficient_data("Every fold failed; see the report for details."));
    }
    Ok(())
}

fn handle_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let registry = pipeline::load_registry(&args.data)?;
    let (plan, _) = pipeline::load_or_create_split(&registry, &args.data)?;
    let fold = crate::train::evaluate_fold(&registry, &plan, &args.checkpoint, args.pred_len)?;

    let report = crate::domain::RunReport {
        tool: "frost".to_string(),
        folds: vec![fold],
        failures: Vec::new(),
    };
    pipeline::publish(&report, &args.data.out)
}

/// Turn CLI arguments into a validated experiment config.
pub fn experiment_config(
    args: &ExperimentArgs,
    fold_index: usize,
    valid_ranges: ValidRangeTable,
) -> Result<ExperimentConfig, AppError> {
    let horizons = HorizonSet::from_hours(&args.horizons).map_err(AppError::configuration)?;
    let features = if args.features.is_empty() {
        DEFAULT_FEATURES.to_vec()
    } else {
        args.features.clone()
    };
    let preprocess = PreprocessConfig {
        features,
        valid_ranges,
    };

    let config = ExperimentConfig {
        fold_index,
        model: ModelConfig {
            input_dim: preprocess.feature_count(),
            context_length: args.context_length,
            d_model: args.d_model,
            n_heads: args.heads,
            n_layers: args.layers,
            ff_dim: args.ff_dim,
            decoder_hidden: args.decoder_hidden,
            seed: args.seed,
        },
        preprocess,
        window: WindowConfig {
            context_length: args.context_length,
            horizons,
            stride: args.stride,
        },
        train: TrainConfig {
            batch_size: args.batch_size,
            max_epochs: args.max_epochs,
            patience: args.patience,
            learning_rate: args.learning_rate,
            min_delta: args.min_delta,
            clip_norm: args.clip_norm,
            val_fraction: args.val_fraction,
            holdout_fraction: args.holdout_fraction,
            seed: args.seed,
        },
        pred_len: args.pred_len,
    };
    config.validate()?;
    Ok(config)
}

/// Default location of the split artifact inside the output directory.
pub fn default_split_path(out: &std::path::Path) -> PathBuf {
    out.join("split.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn args(extra: &[&str]) -> ExperimentArgs {
        let mut argv = vec!["frost", "train", "--synthetic", "3"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Train(t) => t.experiment,
            _ => unreachable!(),
        }
    }

    #[test]
    fn defaults_build_a_valid_experiment() {
        let cfg = experiment_config(&args(&[]), 0, ValidRangeTable::default()).unwrap();
        assert_eq!(cfg.window.horizons, HorizonSet::all());
        assert_eq!(cfg.model.input_dim, cfg.preprocess.feature_count());
        assert_eq!(cfg.model.context_length, 24);
    }

    #[test]
    fn unsupported_horizon_is_a_configuration_error() {
        let err = experiment_config(&args(&["--horizons", "3,5"]), 0, ValidRangeTable::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn pred_len_outside_horizons_is_rejected() {
        let err = experiment_config(
            &args(&["--horizons", "3,6", "--pred-len", "12"]),
            0,
            ValidRangeTable::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn bad_fold_index_is_rejected() {
        assert!(experiment_config(&args(&[]), 3, ValidRangeTable::default()).is_err());
    }
}
