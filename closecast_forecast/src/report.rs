use std::path::PathBuf;

use closecast_rs::{PreparedDataset, StageReport};

use crate::metrics::RegressionMetrics;
use crate::models::{ModelEvaluation, ModelSuite};

fn metrics_row(split: &str, metrics: Option<&RegressionMetrics>) -> String {
    match metrics {
        Some(m) => format!(
            "    {:<6} MSE: {:>14.6}  RMSE: {:>12.6}  MAE: {:>12.6}  R\u{b2}: {:>9.6}",
            split, m.mse, m.rmse, m.mae, m.r2
        ),
        None => format!("    {split:<6} (no rows)"),
    }
}

fn model_block(lines: &mut Vec<String>, evaluation: &ModelEvaluation) {
    lines.push(format!("  {}", evaluation.kind));
    lines.push(metrics_row("Train", evaluation.train.as_ref()));
    lines.push(metrics_row("Test", evaluation.test.as_ref()));
    if let Some(test) = evaluation.test {
        lines.push(format!("    Performance: {}", test.label()));
    }
}

fn stage_table(lines: &mut Vec<String>, reports: &[StageReport]) {
    lines.push(format!(
        "  {:<18} {:>8} {:>8} {:>8} {:>8}",
        "Stage", "Before", "After", "Filled", "Warn"
    ));
    for report in reports {
        lines.push(format!(
            "  {:<18} {:>8} {:>8} {:>8} {:>8}",
            report.stage.label(),
            report.rows_before,
            report.rows_after,
            report.filled_cells,
            report.warnings.len()
        ));
    }
}

/// Plain-text run summary printed at the end of a run.
pub fn format_report(
    prepared: &PreparedDataset,
    models: Option<&ModelSuite>,
    artifacts: &[PathBuf],
    extra_reports: &[StageReport],
) -> String {
    let mut lines = Vec::new();
    lines.push("Next-day close forecast summary".to_string());
    lines.push("-".repeat(72));
    lines.push(format!(
        "  Input rows: {}  Cleaned rows: {}  Labelled rows: {}",
        prepared.load.rows,
        prepared.table.height(),
        prepared.modeling.len()
    ));
    lines.push(format!(
        "  Train rows: {}  Test rows: {}  Features: {}",
        prepared.partition.train.len(),
        prepared.partition.test.len(),
        prepared.modeling.feature_names.len()
    ));
    lines.push(format!(
        "  Close: '{}'  Open: '{}'  Date: '{}'",
        prepared.columns.close,
        prepared.columns.open.as_deref().unwrap_or("-"),
        prepared.columns.date
    ));
    lines.push(String::new());
    let mut reports: Vec<StageReport> = prepared.reports.clone();
    reports.extend(extra_reports.iter().cloned());
    stage_table(&mut lines, &reports);

    match models {
        None => {
            lines.push(String::new());
            lines.push("  Models were not run.".to_string());
        }
        Some(suite) => {
            lines.push(String::new());
            lines.push("Model performance".to_string());
            lines.push("-".repeat(72));
            for evaluation in [suite.linear.as_ref(), suite.knn.as_ref()].into_iter().flatten() {
                model_block(&mut lines, evaluation);
            }

            if !suite.sweep.entries.is_empty() {
                lines.push(String::new());
                lines.push(format!(
                    "  {:>4}  {:>10}  {:>12}  {:>12}  {:>12}",
                    "k", "R\u{b2}", "MSE", "RMSE", "MAE"
                ));
                for entry in &suite.sweep.entries {
                    let marker = if entry.k == suite.best_k { " *" } else { "" };
                    lines.push(format!(
                        "  {:>4}  {:>10.6}  {:>12.6}  {:>12.6}  {:>12.6}{}",
                        entry.k,
                        entry.metrics.r2,
                        entry.metrics.mse,
                        entry.metrics.rmse,
                        entry.metrics.mae,
                        marker
                    ));
                }
            }
            for (k, reason) in &suite.sweep.skipped {
                lines.push(format!("  k={k} skipped: {reason}"));
            }
            lines.push(format!("  Best k: {}", suite.best_k));
            match suite.best_model() {
                Some(best) => lines.push(format!(
                    "  Best model by test R\u{b2}: {} ({:.6})",
                    best.kind,
                    best.test_r2().unwrap_or(f64::NAN)
                )),
                None => lines.push("  No model could be scored on the test set.".to_string()),
            }
        }
    }

    let warnings: Vec<&String> = prepared
        .reports
        .iter()
        .chain(extra_reports)
        .flat_map(|report| report.warnings.iter())
        .collect();
    if !warnings.is_empty() {
        lines.push(String::new());
        lines.push(format!("Warnings ({}):", warnings.len()));
        for warning in warnings {
            lines.push(format!("  - {warning}"));
        }
    }

    if !artifacts.is_empty() {
        lines.push(String::new());
        lines.push("Artifacts:".to_string());
        for path in artifacts {
            lines.push(format!("  {}", path.display()));
        }
    }
    lines.join("\n")
}

pub fn print_report(
    prepared: &PreparedDataset,
    models: Option<&ModelSuite>,
    artifacts: &[PathBuf],
    extra_reports: &[StageReport],
) {
    println!();
    println!("{}", format_report(prepared, models, artifacts, extra_reports));
}
