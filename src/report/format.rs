//! Formatted terminal output: split summary and per-fold metric tables.
//!
//! Formatting lives here so the training and metric code stays free of
//! presentation concerns.

use crate::domain::{EvalGroup, FoldReport, HorizonMetrics, RunReport};
use crate::registry::StationRegistry;
use crate::split::SplitPlan;

/// Fold membership with station names where the registry knows them.
pub fn format_split(plan: &SplitPlan, registry: &StationRegistry) -> String {
    let mut out = String::new();
    out.push_str("=== frost - spatial split (MDS, haversine) ===\n");
    out.push_str(&format!(
        "Stations: {} | folds: {}\n",
        plan.mds_order.len(),
        plan.k
    ));
    for fold in &plan.folds {
        out.push_str(&format!(
            "\nFold {} (train {} / test {}):\n",
            fold.fold_index,
            fold.train_station_ids.len(),
            fold.test_station_ids.len()
        ));
        for id in &fold.test_station_ids {
            let name = registry.get(*id).map(|s| s.meta.name.as_str()).unwrap_or("");
            out.push_str(format!("  test {id:>6} {}", truncate(name, 32)).trim_end());
            out.push('\n');
        }
    }
    out
}

/// Full run summary: one block per fold plus failures.
pub fn format_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("=== frost - Frost Forecast Evaluation ===\n");
    for fold in &report.folds {
        out.push_str(&format_fold(fold));
        out.push('\n');
    }
    if !report.failures.is_empty() {
        out.push_str("Failed folds:\n");
        for f in &report.failures {
            out.push_str(&format!("  fold {} ({}): {}\n", f.fold_index, f.kind, f.message));
        }
    }
    out
}

fn format_fold(fold: &FoldReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\nFold {} | L={}h | horizons={:?}\n",
        fold.fold_index, fold.context_length, fold.horizons
    ));
    out.push_str(&format!(
        "Training: {:?} after {} epochs | best epoch {} | val loss {:.5}\n",
        fold.stop_reason, fold.epochs_run, fold.best_epoch, fold.best_val_loss
    ));
    out.push_str(&format!(
        "Samples: train={} val={} | skipped targets={} | short stations={} | skipped stations={}\n",
        fold.train_samples,
        fold.val_samples,
        fold.skipped_targets,
        fold.short_stations.len(),
        fold.skipped_stations.len()
    ));
    out.push_str(&format!("Checkpoint: {}\n", fold.checkpoint));

    out.push_str("\nInternal test (held-out stations):\n");
    out.push_str(&format_group(&fold.internal));
    out.push_str("\nExternal test (hold-out period):\n");
    out.push_str(&format_group(&fold.external));
    out
}

fn format_group(group: &EvalGroup) -> String {
    if group.samples == 0 {
        return "  (no samples)\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!(
        "  stations={} samples={}\n",
        group.station_ids.len(),
        group.samples
    ));
    out.push_str(
        format!(
            "{:<10} {:>4} {:>8} {:>8} {:>8} {:>7} {:>7} {:>7} {:>7} {:>6} {:>6} {:>6} {:>6}",
            "forecaster", "h", "mse", "rmse", "mae", "acc", "prec", "rec", "f1", "tp", "fp", "tn", "fn"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<10} {:-<4} {:-<8} {:-<8} {:-<8} {:-<7} {:-<7} {:-<7} {:-<7} {:-<6} {:-<6} {:-<6} {:-<6}",
            "", "", "", "", "", "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');
    for m in &group.model {
        out.push_str(&metric_row("model", m));
    }
    for m in &group.baseline {
        out.push_str(&metric_row("baseline", m));
    }
    out
}

fn metric_row(name: &str, m: &HorizonMetrics) -> String {
    let c = &m.confusion;
    let mut row = format!(
        "{:<10} {:>4} {:>8.3} {:>8.3} {:>8.3} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>6} {:>6} {:>6} {:>6}",
        name, m.hours, m.mse, m.rmse, m.mae, m.accuracy, m.precision, m.recall, m.f1, c.tp, c.fp, c.tn, c.fn_
    )
    .trim_end()
    .to_string();
    row.push('\n');
    row
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Confusion, FoldFailure, StopReason};
    use crate::report::metrics::horizon_metrics;

    fn fold() -> FoldReport {
        let metrics = horizon_metrics(3, &[(1.0, 0.5, false), (-0.5, -1.0, true)]);
        FoldReport {
            fold_index: 1,
            horizons: vec![3],
            context_length: 24,
            stop_reason: StopReason::Converged,
            epochs_run: 7,
            best_epoch: 4,
            best_val_loss: 0.125,
            checkpoint: "out/fold1.ckpt.json".to_string(),
            train_samples: 100,
            val_samples: 10,
            internal: EvalGroup {
                station_ids: [5, 9].into_iter().collect(),
                samples: 2,
                model: vec![metrics.clone()],
                baseline: vec![metrics],
            },
            external: EvalGroup::default(),
            skipped_stations: Vec::new(),
            skipped_targets: 3,
            short_stations: vec![12],
        }
    }

    #[test]
    fn run_report_lists_folds_groups_and_failures() {
        let report = RunReport {
            tool: "frost".to_string(),
            folds: vec![fold()],
            failures: vec![FoldFailure {
                fold_index: 2,
                kind: "insufficient data".to_string(),
                message: "Fold 2: no training samples.".to_string(),
            }],
        };
        let text = format_run_report(&report);
        assert!(text.contains("Fold 1 | L=24h"));
        assert!(text.contains("Converged after 7 epochs"));
        assert!(text.contains("model         3"));
        assert!(text.contains("baseline      3"));
        assert!(text.contains("(no samples)"));
        assert!(text.contains("fold 2 (insufficient data)"));
        assert!(text.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn confusion_counts_are_printed() {
        let mut m = horizon_metrics(6, &[]);
        m.confusion = Confusion { tp: 4, fp: 1, tn: 20, fn_: 2 };
        let row = metric_row("model", &m);
        assert!(row.trim_end().ends_with("4      1     20      2"));
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("Fresno State", 6), "Fresn.");
        assert_eq!(truncate("Davis", 6), "Davis");
    }
}
