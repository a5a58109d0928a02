//! Read/write model checkpoint JSON files.
//!
//! A checkpoint is written to a sibling temp file and renamed into place, so
//! an interrupted run always leaves the previous complete checkpoint behind.
//! File names encode fold, context length and horizons:
//! `fold{k}_L{L}_h{3-6-12-24}.ckpt.json`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::{ExperimentConfig, ModelCheckpoint};
use crate::error::AppError;

pub fn checkpoint_file_name(config: &ExperimentConfig) -> String {
    format!(
        "fold{}_L{}_h{}.ckpt.json",
        config.fold_index,
        config.window.context_length,
        config.window.horizons.label()
    )
}

pub fn checkpoint_path(dir: &Path, config: &ExperimentConfig) -> PathBuf {
    dir.join(checkpoint_file_name(config))
}

/// Atomically replace `path` with `checkpoint`.
pub fn write_checkpoint(path: &Path, checkpoint: &ModelCheckpoint) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::io(format!("Failed to create checkpoint dir '{}': {e}", parent.display()))
        })?;
    }

    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp).map_err(|e| {
            AppError::io(format!("Failed to create checkpoint '{}': {e}", tmp.display()))
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, checkpoint)
            .map_err(|e| AppError::io(format!("Failed to write checkpoint JSON: {e}")))?;
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to flush checkpoint: {e}")))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| AppError::io(format!("Failed to sync checkpoint: {e}")))?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        AppError::io(format!(
            "Failed to move checkpoint into place at '{}': {e}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Read a checkpoint and validate its embedded configuration.
pub fn read_checkpoint(path: &Path) -> Result<ModelCheckpoint, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open checkpoint '{}': {e}", path.display())))?;
    let checkpoint: ModelCheckpoint = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::io(format!("Invalid checkpoint JSON '{}': {e}", path.display())))?;
    checkpoint.config.validate()?;
    Ok(checkpoint)
}
