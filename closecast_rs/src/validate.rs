//! Null imputation and bound checks for keyword-classed numeric columns,
//! plus the table-wide missing-data repair that runs after the feature
//! engine.

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::columns::normalize_header;
use crate::data::RecordTable;
use crate::error::Result;
use crate::stage::{Stage, StageReport};

/// Price columns only reject grossly corrupted values below this floor.
pub const PRICE_FLOOR: f64 = -1000.0;
pub const UNKNOWN_TEXT: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    /// Forward fill, then back fill the leading gap.
    ForwardBack,
    /// Linear interpolation over interior gaps, then forward/back fill.
    InterpolateForwardBack,
}

impl FillStrategy {
    pub fn apply(self, values: &mut [Option<f64>]) {
        if self == FillStrategy::InterpolateForwardBack {
            interpolate_linear(values);
        }
        fill_forward(values);
        fill_backward(values);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Matched against the normalized header by substring.
    pub keyword: String,
    /// `None` disables the bound check.
    pub min_value: Option<f64>,
    pub allow_zero: bool,
    pub fill: FillStrategy,
}

impl ValidationRule {
    pub fn new(keyword: &str, min_value: Option<f64>, allow_zero: bool, fill: FillStrategy) -> Self {
        Self {
            keyword: normalize_header(keyword),
            min_value,
            allow_zero,
            fill,
        }
    }

    pub fn matches(&self, header: &str) -> bool {
        normalize_header(header).contains(self.keyword.as_str())
    }

    /// Whether a (post-fill) value violates the bound for `header`.
    pub fn rejects(&self, header: &str, value: Option<f64>) -> bool {
        let Some(min) = self.min_value else {
            return false;
        };
        if self.allow_zero {
            // A remaining null is not comparable and is left alone.
            return value.is_some_and(|v| v < min);
        }
        match value {
            None => true,
            Some(v) if normalize_header(header).contains("PRICE") => v < PRICE_FLOOR,
            Some(v) => v <= min,
        }
    }
}

pub fn fill_forward(values: &mut [Option<f64>]) {
    let mut last = None;
    for value in values.iter_mut() {
        match value {
            Some(v) => last = Some(*v),
            None => *value = last,
        }
    }
}

pub fn fill_backward(values: &mut [Option<f64>]) {
    let mut next = None;
    for value in values.iter_mut().rev() {
        match value {
            Some(v) => next = Some(*v),
            None => *value = next,
        }
    }
}

/// Linear interpolation by row position between the nearest known values.
/// Leading and trailing gaps are left for the forward/back fill.
pub fn interpolate_linear(values: &mut [Option<f64>]) {
    let mut prev: Option<(usize, f64)> = None;
    let mut idx = 0;
    while idx < values.len() {
        match values[idx] {
            Some(v) => {
                prev = Some((idx, v));
                idx += 1;
            }
            None => {
                let gap_start = idx;
                while idx < values.len() && values[idx].is_none() {
                    idx += 1;
                }
                let (Some((left_idx, left)), Some(right)) = (prev, values.get(idx).copied().flatten())
                else {
                    continue;
                };
                let span = (idx - left_idx) as f64;
                for (pos, slot) in values[gap_start..idx].iter_mut().enumerate() {
                    let step = (gap_start + pos - left_idx) as f64;
                    *slot = Some(left + (right - left) * step / span);
                }
            }
        }
    }
}

/// Fill, then bound-check, every float column matched by each rule in
/// order. Rows failing a bound are removed from the whole table. Imputed
/// values are not exempt from the bound check.
pub fn apply_validation(
    table: &mut RecordTable,
    rules: &[ValidationRule],
    date_column: &str,
) -> Result<StageReport> {
    let mut report = StageReport::begin(Stage::Validate, table.height());

    for rule in rules {
        let matching: Vec<String> = table
            .column_names()
            .into_iter()
            .filter(|name| name != date_column && rule.matches(name))
            .collect();

        for column in matching {
            if !table.is_float(&column) {
                continue;
            }
            let mut values = table.float_values(&column)?;
            let nulls = values.iter().filter(|v| v.is_none()).count();
            if !values.is_empty() && nulls == values.len() {
                report.warn(format!(
                    "column '{column}' holds no values; fill and bound check skipped"
                ));
                continue;
            }
            if nulls > 0 {
                rule.fill.apply(&mut values);
                report.filled_cells += nulls;
                table.set_float_column(&column, values.clone())?;
                debug!(column = %column, filled = nulls, strategy = ?rule.fill, "Filled nulls");
            }

            let keep: Vec<bool> = values.iter().map(|v| !rule.rejects(&column, *v)).collect();
            let removed = table.retain_rows(&keep)?;
            if removed > 0 {
                info!(column = %column, keyword = %rule.keyword, removed, "Removed rows failing bound");
            }
        }
    }

    Ok(report.finish(table.height()))
}

/// Fill what the feature-stage drop left behind: moving averages by
/// forward/back fill, other numeric columns by interpolation, text columns
/// with a placeholder. Rows that still hold nulls are dropped.
pub fn repair_missing(table: &mut RecordTable) -> Result<StageReport> {
    let mut report = StageReport::begin(Stage::RepairMissing, table.height());

    for column in table.column_names() {
        let nulls = table.null_count(&column)?;
        if nulls == 0 || nulls == table.height() {
            continue;
        }
        let dtype = table.frame().column(&column)?.dtype().clone();
        match dtype {
            DataType::Float64 => {
                let strategy = if column.to_lowercase().contains("moving_average") {
                    FillStrategy::ForwardBack
                } else {
                    FillStrategy::InterpolateForwardBack
                };
                let mut values = table.float_values(&column)?;
                strategy.apply(&mut values);
                table.set_float_column(&column, values)?;
            }
            DataType::String => {
                let values = table
                    .text_values(&column)?
                    .into_iter()
                    .map(|value| Some(value.unwrap_or_else(|| UNKNOWN_TEXT.to_string())))
                    .collect();
                table.set_text_column(&column, values)?;
            }
            _ => continue,
        }
        report.filled_cells += nulls;
        debug!(column = %column, filled = nulls, "Repaired missing values");
    }

    let dropped = table.drop_rows_with_nulls(Stage::RepairMissing)?;
    for column in &dropped.skipped_all_null {
        report.warn(format!("column '{column}' is entirely null"));
    }
    Ok(report.finish(table.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use polars::prelude::*;

    #[test]
    fn interpolation_fills_interior_gaps_then_edges() {
        let mut values = vec![None, Some(1.0), None, None, Some(4.0), None];
        FillStrategy::InterpolateForwardBack.apply(&mut values);
        assert_eq!(
            values,
            vec![Some(1.0), Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0)]
        );
    }

    #[test]
    fn forward_back_fill_copies_neighbours() {
        let mut values = vec![None, Some(2.0), None, Some(5.0), None];
        FillStrategy::ForwardBack.apply(&mut values);
        assert_eq!(
            values,
            vec![Some(2.0), Some(2.0), Some(2.0), Some(5.0), Some(5.0)]
        );
    }

    #[test]
    fn price_columns_only_reject_gross_negatives() {
        let rule = ValidationRule::new("PRICE", Some(0.0), false, FillStrategy::ForwardBack);
        assert!(!rule.rejects("CLOSING PRICE", Some(0.0)));
        assert!(!rule.rejects("CLOSING PRICE", Some(-999.0)));
        assert!(rule.rejects("CLOSING PRICE", Some(-1000.5)));
        assert!(rule.rejects("CLOSING PRICE", None));

        let volume = ValidationRule::new("VOLUME", Some(0.0), false, FillStrategy::InterpolateForwardBack);
        assert!(volume.rejects("TOTAL TRADED VOLUME", Some(0.0)));
        assert!(volume.rejects("TOTAL TRADED VOLUME", None));
        assert!(!volume.rejects("TOTAL TRADED VOLUME", Some(0.5)));

        let change = ValidationRule::new("CHANGE", None, true, FillStrategy::ForwardBack);
        assert!(!change.rejects("CHANGE TO PREVIOUS CLOSING (%)", Some(-50.0)));
    }

    #[test]
    fn validation_fills_then_filters() -> anyhow::Result<()> {
        let frame = df!(
            "TRADE DATE" => &["d1", "d2", "d3", "d4"],
            "TOTAL TRADED VOLUME" => &[Some(10.0), None, Some(30.0), Some(0.0)],
            "CLOSING PRICE" => &[Some(1.0), Some(2.0), None, Some(4.0)]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let rules = PipelineConfig::default().validation_rules;
        let report = apply_validation(&mut table, &rules, "TRADE DATE")?;

        assert_eq!(report.filled_cells, 2);
        assert_eq!(report.rows_removed(), 1);
        assert_eq!(
            table.float_values("TOTAL TRADED VOLUME")?,
            vec![Some(10.0), Some(20.0), Some(30.0)]
        );
        assert_eq!(
            table.float_values("CLOSING PRICE")?,
            vec![Some(1.0), Some(2.0), Some(2.0)]
        );
        Ok(())
    }

    #[test]
    fn validation_is_a_no_op_on_clean_tables() -> anyhow::Result<()> {
        let frame = df!(
            "TRADE DATE" => &["d1", "d2", "d3"],
            "TOTAL TRADED VOLUME" => &[10.0, 20.0, 30.0],
            "CLOSING PRICE" => &[1.0, 2.0, 3.0],
            "CHANGE TO PREVIOUS CLOSING (%)" => &[0.0, -1.5, 2.0]
        )?;
        let rules = PipelineConfig::default().validation_rules;

        let mut once = RecordTable::from_frame(frame.clone());
        apply_validation(&mut once, &rules, "TRADE DATE")?;
        let mut twice = once.clone();
        let report = apply_validation(&mut twice, &rules, "TRADE DATE")?;

        assert!(once.frame().equals_missing(&frame));
        assert!(twice.frame().equals_missing(once.frame()));
        assert_eq!(report.filled_cells, 0);
        assert_eq!(report.rows_removed(), 0);
        Ok(())
    }

    #[test]
    fn all_null_columns_do_not_empty_the_table() -> anyhow::Result<()> {
        let frame = df!(
            "TRADE DATE" => &["d1", "d2"],
            "REFERENCE PRICE" => &[None::<f64>, None],
            "CLOSING PRICE" => &[1.0, 2.0]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let rules = PipelineConfig::default().validation_rules;
        let report = apply_validation(&mut table, &rules, "TRADE DATE")?;
        assert_eq!(table.height(), 2);
        assert!(report.has_warnings());
        Ok(())
    }

    #[test]
    fn repair_fills_numeric_and_text_gaps() -> anyhow::Result<()> {
        let frame = df!(
            "MARKET" => &[Some("MAIN"), None, Some("MAIN")],
            "moving_average_5" => &[Some(1.0), None, Some(3.0)],
            "VWAP" => &[Some(1.0), None, Some(3.0)]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let report = repair_missing(&mut table)?;
        assert_eq!(report.filled_cells, 3);
        assert_eq!(table.height(), 3);
        assert_eq!(
            table.float_values("moving_average_5")?,
            vec![Some(1.0), Some(1.0), Some(3.0)]
        );
        assert_eq!(
            table.float_values("VWAP")?,
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
        assert_eq!(table.text_values("MARKET")?[1].as_deref(), Some(UNKNOWN_TEXT));
        Ok(())
    }
}
