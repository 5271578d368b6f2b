pub mod charts;
pub mod metrics;
pub mod models;
pub mod report;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use closecast_rs::features::{DAILY_RETURN, moving_average_column};
use closecast_rs::storage::{prune_columns, write_csv_with_bom, write_modeling_frame};
use closecast_rs::{PipelineConfig, PreparedDataset, Stage, StageReport, prepare_dataset};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::charts::{ChartError, LineSeries, PredictionPanel};
use crate::models::{ModelSuite, run_models};

/// What a completed run produced, for callers that want more than the
/// console summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub input_sha256: String,
    pub input_rows: usize,
    pub cleaned_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_names: Vec<String>,
    pub best_k: Option<usize>,
    pub best_model: Option<String>,
    pub best_test_r2: Option<f64>,
    pub cleaned_csv: PathBuf,
    pub train_csv: PathBuf,
    pub test_csv: PathBuf,
    pub charts: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

fn render_trend(config: &PipelineConfig, prepared: &PreparedDataset) -> Result<String> {
    let table = &prepared.table;
    let dates: Vec<String> = table
        .text_values(&prepared.columns.date)?
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    let close = table.float_values_with_nans(&prepared.columns.close)?;
    let short_name = moving_average_column(config.short_window);
    let long_name = moving_average_column(config.long_window);
    let short = table.float_values_with_nans(&short_name)?;
    let long = table.float_values_with_nans(&long_name)?;
    let close_label = "Closing price".to_string();
    let short_label = format!("{}-day moving average", config.short_window);
    let long_label = format!("{}-day moving average", config.long_window);
    let series = [
        LineSeries {
            label: &close_label,
            values: &close,
        },
        LineSeries {
            label: &short_label,
            values: &short,
        },
        LineSeries {
            label: &long_label,
            values: &long,
        },
    ];
    Ok(charts::trend_chart(&dates, &series)?)
}

fn render_histogram(config: &PipelineConfig, prepared: &PreparedDataset) -> Result<String> {
    let returns = prepared.table.float_values_with_nans(DAILY_RETURN)?;
    Ok(charts::return_histogram(&returns, config.histogram_bins)?)
}

fn render_predictions(prepared: &PreparedDataset, suite: &ModelSuite) -> Result<String, ChartError> {
    let actual = &prepared.partition.test.target;
    let panels: Vec<PredictionPanel<'_>> = [suite.linear.as_ref(), suite.knn.as_ref()]
        .into_iter()
        .flatten()
        .filter(|evaluation| evaluation.test.is_some())
        .map(|evaluation| PredictionPanel {
            title: evaluation.kind.to_string(),
            actual: actual.as_slice(),
            predicted: &evaluation.test_predictions,
            r2: evaluation.test_r2(),
        })
        .collect();
    charts::prediction_scatter(&panels)
}

/// Render and write every chart; a chart that cannot be drawn is logged and
/// skipped.
fn render_charts(
    config: &PipelineConfig,
    prepared: &PreparedDataset,
    suite: Option<&ModelSuite>,
) -> (Vec<PathBuf>, StageReport) {
    let mut report = StageReport::begin(Stage::Charts, prepared.table.height());
    let mut written = Vec::new();

    let mut jobs: Vec<(&str, Result<String>)> = vec![
        (
            config.artifacts.trend_chart.as_str(),
            render_trend(config, prepared),
        ),
        (
            config.artifacts.return_histogram_chart.as_str(),
            render_histogram(config, prepared),
        ),
    ];
    match suite {
        Some(suite) => {
            jobs.push((
                config.artifacts.prediction_chart.as_str(),
                render_predictions(prepared, suite).map_err(Into::into),
            ));
            jobs.push((
                config.artifacts.knn_sweep_chart.as_str(),
                charts::knn_sweep_chart(&suite.sweep, suite.best_k).map_err(Into::into),
            ));
        }
        None => report.warn("models were not run; prediction and k-sweep charts skipped"),
    }

    for (name, rendered) in jobs {
        let path = config.artifact_path(name);
        let outcome = rendered.and_then(|svg| Ok(charts::write_svg(&path, &svg)?));
        match outcome {
            Ok(()) => {
                info!(path = %path.display(), "Wrote chart");
                written.push(path);
            }
            Err(err) => report.warn(format!("chart {name} skipped: {err:#}")),
        }
    }
    let rows = prepared.table.height();
    (written, report.finish(rows))
}

/// Run the whole batch job: clean, split, model, report, render and write.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary> {
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    match serde_json::to_string(config) {
        Ok(json) => debug!(config = %json, "Effective configuration"),
        Err(err) => warn!(error = %err, "Could not serialise configuration"),
    }

    let mut prepared = prepare_dataset(config)
        .with_context(|| format!("failed to prepare {}", config.input_csv.display()))?;

    let train_csv = config.train_csv_path();
    let test_csv = config.test_csv_path();
    write_modeling_frame(&prepared.partition.train, &config.target_column, &train_csv)?;
    write_modeling_frame(&prepared.partition.test, &config.target_column, &test_csv)?;

    let suite = if config.run_models {
        Some(run_models(
            &prepared.partition,
            &config.knn_k_values,
            config.fallback_k,
        ))
    } else {
        info!("Model stage disabled");
        None
    };

    let mut extra_reports: Vec<StageReport> = suite.iter().map(|s| s.report.clone()).collect();
    let charts = if config.render_charts {
        let (written, chart_report) = render_charts(config, &prepared, suite.as_ref());
        extra_reports.push(chart_report);
        written
    } else {
        Vec::new()
    };

    let write_report = StageReport::begin(Stage::Write, prepared.table.height());
    prune_columns(&mut prepared.table, &config.columns_to_remove)?;
    let cleaned_csv = config.cleaned_csv_path();
    write_csv_with_bom(prepared.table.frame_mut(), &cleaned_csv)?;
    extra_reports.push(write_report.finish(prepared.table.height()));

    let mut artifacts = vec![cleaned_csv.clone(), train_csv.clone(), test_csv.clone()];
    artifacts.extend(charts.iter().cloned());
    report::print_report(&prepared, suite.as_ref(), &artifacts, &extra_reports);

    let best = suite.as_ref().and_then(ModelSuite::best_model);
    let warnings = prepared
        .warnings()
        .map(str::to_string)
        .chain(extra_reports.iter().flat_map(|r| r.warnings.iter().cloned()))
        .collect();
    let summary = RunSummary {
        input_sha256: prepared.load.sha256.clone(),
        input_rows: prepared.load.rows,
        cleaned_rows: prepared.table.height(),
        train_rows: prepared.partition.train.len(),
        test_rows: prepared.partition.test.len(),
        feature_names: prepared.modeling.feature_names.clone(),
        best_k: suite.as_ref().map(|s| s.best_k),
        best_model: best.map(|evaluation| evaluation.kind.to_string()),
        best_test_r2: best.and_then(|evaluation| evaluation.test_r2()),
        cleaned_csv,
        train_csv,
        test_csv,
        charts,
        warnings,
    };
    info!(
        rows = summary.cleaned_rows,
        train = summary.train_rows,
        test = summary.test_rows,
        "Pipeline finished"
    );
    Ok(summary)
}
