use std::ops::Range;

use serde::Serialize;
use tracing::info;

use crate::columns::normalize_header;
use crate::data::RecordTable;
use crate::error::{PipelineError, Result};
use crate::numeric::column_as_f64;
use crate::stage::{Stage, StageReport};

/// Row-aligned feature matrix and next-day close target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelingFrame {
    pub feature_names: Vec<String>,
    /// One row per labelled trading day, columns in `feature_names` order.
    pub features: Vec<Vec<f64>>,
    pub target: Vec<f64>,
    /// Position of each row in the cleaned table.
    pub positions: Vec<usize>,
    pub dates: Vec<Option<String>>,
}

impl ModelingFrame {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> ModelingFrame {
        ModelingFrame {
            feature_names: self.feature_names.clone(),
            features: self.features[range.clone()].to_vec(),
            target: self.target[range.clone()].to_vec(),
            positions: self.positions[range.clone()].to_vec(),
            dates: self.dates[range].to_vec(),
        }
    }
}

/// Candidate features present in the table, in candidate order. Matching is
/// case and whitespace insensitive; each table column is used at most once.
pub fn select_feature_columns(table_columns: &[String], candidates: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for candidate in candidates {
        let wanted = normalize_header(candidate);
        if let Some(column) = table_columns
            .iter()
            .find(|column| normalize_header(column) == wanted && !selected.contains(*column))
        {
            selected.push(column.clone());
        }
    }
    selected
}

/// Pair each row's features with the next row's close. The last row has no
/// label and rows with a null feature are dropped together with their
/// target, so alignment is kept by construction.
pub fn build_modeling_frame(
    table: &RecordTable,
    close_column: &str,
    date_column: &str,
    candidates: &[String],
) -> Result<(ModelingFrame, StageReport)> {
    let mut report = StageReport::begin(Stage::SplitTarget, table.height());
    let close = column_as_f64(table, close_column)?;
    let dates = table.text_values(date_column)?;

    let mut feature_names = Vec::new();
    let mut columns = Vec::new();
    for name in select_feature_columns(&table.column_names(), candidates) {
        let values = column_as_f64(table, &name)?;
        if values.iter().all(Option::is_none) {
            report.warn(format!("feature '{name}' holds no numeric values and is skipped"));
            continue;
        }
        feature_names.push(name);
        columns.push(values);
    }
    if feature_names.is_empty() {
        report.warn("none of the candidate feature columns are present");
    }

    let mut frame = ModelingFrame {
        feature_names,
        ..ModelingFrame::default()
    };
    for row in 0..table.height().saturating_sub(1) {
        let Some(target) = close[row + 1] else {
            continue;
        };
        let features: Option<Vec<f64>> = columns.iter().map(|column| column[row]).collect();
        let Some(features) = features else {
            continue;
        };
        frame.features.push(features);
        frame.target.push(target);
        frame.positions.push(row);
        frame.dates.push(dates[row].clone());
    }

    if frame.is_empty() {
        return Err(PipelineError::EmptyTable {
            stage: Stage::SplitTarget,
            detail: "no row has both a complete feature set and a next-day close".to_string(),
        });
    }
    info!(
        rows = frame.len(),
        features = frame.feature_names.len(),
        target = close_column,
        "Built feature matrix and next-day target"
    );
    let rows = frame.len();
    Ok((frame, report.finish(rows)))
}

#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub train: ModelingFrame,
    pub test: ModelingFrame,
}

/// First `floor(train_fraction * N)` rows train, the rest test. Order is
/// never shuffled.
pub fn chronological_split(frame: &ModelingFrame, train_fraction: f64) -> Partition {
    let total = frame.len();
    let train_size = ((total as f64) * train_fraction.clamp(0.0, 1.0)).floor() as usize;
    let train_size = train_size.min(total);
    info!(
        train = train_size,
        test = total - train_size,
        "Partitioned rows chronologically"
    );
    Partition {
        train: frame.slice(0..train_size),
        test: frame.slice(train_size..total),
    }
}
