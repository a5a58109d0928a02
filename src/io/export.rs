//! Export run results: the full report as JSON and a flat metrics CSV.
//!
//! The CSV has one row per fold, test group, forecaster and horizon so it can
//! be pivoted in a spreadsheet without parsing the nested JSON.

use std::fs::{self, File};
use std::path::Path;

use serde::Serialize;

use crate::domain::{HorizonMetrics, RunReport};
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    fold: usize,
    group: &'a str,
    forecaster: &'a str,
    horizon_hours: u32,
    samples: usize,
    mse: f64,
    rmse: f64,
    mae: f64,
    accuracy: f64,
    precision: f64,
    recall: f64,
    f1: f64,
    tp: usize,
    fp: usize,
    tn: usize,
    #[serde(rename = "fn")]
    fn_: usize,
}

impl<'a> MetricRow<'a> {
    fn new(fold: usize, group: &'a str, forecaster: &'a str, m: &HorizonMetrics) -> Self {
        Self {
            fold,
            group,
            forecaster,
            horizon_hours: m.hours,
            samples: m.samples,
            mse: m.mse,
            rmse: m.rmse,
            mae: m.mae,
            accuracy: m.accuracy,
            precision: m.precision,
            recall: m.recall,
            f1: m.f1,
            tp: m.confusion.tp,
            fp: m.confusion.fp,
            tn: m.confusion.tn,
            fn_: m.confusion.fn_,
        }
    }
}

pub fn write_report_json(path: &Path, report: &RunReport) -> Result<(), AppError> {
    create_parent(path)?;
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create report '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, report)
        .map_err(|e| AppError::io(format!("Failed to write report JSON: {e}")))?;
    Ok(())
}

pub fn write_metrics_csv(path: &Path, report: &RunReport) -> Result<(), AppError> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to create metrics CSV '{}': {e}", path.display())))?;

    for fold in &report.folds {
        for (group_name, group) in [("internal", &fold.internal), ("external", &fold.external)] {
            let forecasters = [("model", &group.model), ("baseline", &group.baseline)];
            for (forecaster, metrics) in forecasters {
                for m in metrics {
                    writer
                        .serialize(MetricRow::new(fold.fold_index, group_name, forecaster, m))
                        .map_err(|e| AppError::io(format!("Failed to write metrics CSV row: {e}")))?;
                }
            }
        }
    }
    writer
        .flush()
        .map_err(|e| AppError::io(format!("Failed to flush metrics CSV: {e}")))?;
    Ok(())
}

fn create_parent(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvalGroup, FoldReport, StopReason};
    use crate::report::horizon_metrics;

    #[test]
    fn metrics_csv_has_one_row_per_horizon_and_forecaster() {
        let dir = tempfile::tempdir().unwrap();
        let m3 = horizon_metrics(3, &[(-1.0, -2.0, true)]);
        let m6 = horizon_metrics(6, &[(2.0, 1.0, false)]);
        let report = RunReport {
            tool: "frost".to_string(),
            folds: vec![FoldReport {
                fold_index: 0,
                horizons: vec![3, 6],
                context_length: 24,
                stop_reason: StopReason::MaxEpochsReached,
                epochs_run: 2,
                best_epoch: 2,
                best_val_loss: 0.5,
                checkpoint: String::new(),
                train_samples: 10,
                val_samples: 2,
                internal: EvalGroup {
                    station_ids: [1].into_iter().collect(),
                    samples: 1,
                    model: vec![m3.clone(), m6.clone()],
                    baseline: vec![m3, m6],
                },
                external: EvalGroup::default(),
                skipped_stations: Vec::new(),
                skipped_targets: 0,
                short_stations: Vec::new(),
            }],
            failures: Vec::new(),
        };

        let csv_path = dir.path().join("out").join("metrics.csv");
        write_metrics_csv(&csv_path, &report).unwrap();
        let text = fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("fold,group,forecaster,horizon_hours"));
        assert!(lines[0].ends_with("tp,fp,tn,fn"));
        assert!(lines[1].starts_with("0,internal,model,3,1,"));
        assert!(lines[4].starts_with("0,internal,baseline,6,"));

        let json_path = dir.path().join("report.json");
        write_report_json(&json_path, &report).unwrap();
        let back: RunReport = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(back.folds[0].internal.model.len(), 2);
    }
}
