use tracing::info;

use crate::columns::{RequiredColumns, ResolvedColumns};
use crate::config::PipelineConfig;
use crate::data::{LoadSummary, RecordTable};
use crate::error::{PipelineError, Result};
use crate::features::compute_features;
use crate::numeric::coerce_numeric_columns;
use crate::split::{ModelingFrame, Partition, build_modeling_frame, chronological_split};
use crate::stage::{Stage, StageReport};
use crate::temporal::{filter_suspended, normalize_dates};
use crate::validate::{apply_validation, repair_missing};

/// Everything the modeling and writing stages need from the cleaning run.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub table: RecordTable,
    pub load: LoadSummary,
    pub resolved: ResolvedColumns,
    pub columns: RequiredColumns,
    pub modeling: ModelingFrame,
    pub partition: Partition,
    pub reports: Vec<StageReport>,
}

impl PreparedDataset {
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.reports
            .iter()
            .flat_map(|report| report.warnings.iter().map(String::as_str))
    }
}

fn ensure_rows(table: &RecordTable, stage: Stage) -> Result<()> {
    if table.height() == 0 {
        return Err(PipelineError::EmptyTable {
            stage,
            detail: "no rows remain".to_string(),
        });
    }
    Ok(())
}

/// Run the loader through the partitioner in order on one table.
pub fn prepare_dataset(config: &PipelineConfig) -> Result<PreparedDataset> {
    let mut reports = Vec::new();

    let (mut table, load) = RecordTable::load(&config.input_csv)?;
    reports.push(StageReport::begin(Stage::Load, load.rows).finish(table.height()));
    ensure_rows(&table, Stage::Load)?;

    let mut resolve_report = StageReport::begin(Stage::ResolveColumns, table.height());
    let resolved = config
        .resolver
        .resolve(&table.column_names(), &config.numeric_keywords);
    let columns = resolved.require()?;
    if columns.open.is_none() {
        resolve_report.warn(format!(
            "no opening price column; '{}' stands in for it",
            columns.close
        ));
    }
    info!(
        date = %columns.date,
        close = %columns.close,
        open = columns.open.as_deref().unwrap_or("-"),
        suspended = columns.suspended.as_deref().unwrap_or("-"),
        numeric = resolved.numeric.len(),
        "Resolved column roles"
    );
    reports.push(resolve_report.finish(table.height()));

    reports.push(normalize_dates(&mut table, &columns.date)?);
    ensure_rows(&table, Stage::NormalizeDates)?;

    reports.push(filter_suspended(&mut table, columns.suspended.as_deref())?);
    ensure_rows(&table, Stage::FilterSuspended)?;

    reports.push(coerce_numeric_columns(
        &mut table,
        &resolved.numeric,
        &columns.date,
    )?);

    reports.push(apply_validation(
        &mut table,
        &config.validation_rules,
        &columns.date,
    )?);
    ensure_rows(&table, Stage::Validate)?;

    reports.push(compute_features(
        &mut table,
        &columns.close,
        columns.open.as_deref(),
        config.short_window,
        config.long_window,
    )?);
    ensure_rows(&table, Stage::Features)?;

    reports.push(repair_missing(&mut table)?);
    ensure_rows(&table, Stage::RepairMissing)?;

    let (modeling, split_report) = build_modeling_frame(
        &table,
        &columns.close,
        &columns.date,
        &config.feature_candidates,
    )?;
    reports.push(split_report);

    let partition_report = StageReport::begin(Stage::Partition, modeling.len());
    let partition = chronological_split(&modeling, config.train_fraction);
    reports.push(partition_report.finish(partition.train.len() + partition.test.len()));

    Ok(PreparedDataset {
        table,
        load,
        resolved,
        columns,
        modeling,
        partition,
        reports,
    })
}
