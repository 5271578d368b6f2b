use tracing::{debug, info};

use crate::data::RecordTable;
use crate::error::Result;
use crate::stage::{Stage, StageReport};

/// Strip exchange locale artifacts from a raw token and parse it. Thousands
/// separators, whitespace and percent signs are removed; the Unicode minus
/// and the en-dash become an ASCII hyphen. Anything that still fails to
/// parse (or parses to a non-finite value) yields `None`.
pub fn coerce_token(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && *c != '%' && !c.is_whitespace())
        .map(|c| match c {
            '\u{2212}' | '\u{2013}' => '-',
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Read a column as floats whether or not it went through coercion (a close
/// header such as "LAST" carries no numeric keyword and stays text).
pub fn column_as_f64(table: &RecordTable, column: &str) -> Result<Vec<Option<f64>>> {
    if table.is_float(column) {
        return table.float_values(column);
    }
    Ok(table
        .text_values(column)?
        .iter()
        .map(|value| value.as_deref().and_then(coerce_token))
        .collect())
}

/// Convert every numeric-role column to `f64` in place. The date column is
/// never touched even when its header happens to carry a numeric keyword.
pub fn coerce_numeric_columns(
    table: &mut RecordTable,
    numeric_columns: &[String],
    date_column: &str,
) -> Result<StageReport> {
    let mut report = StageReport::begin(Stage::CoerceNumeric, table.height());
    let mut converted = 0usize;

    for column in numeric_columns {
        if column == date_column || !table.has_column(column) {
            continue;
        }
        let raw = match table.text_values(column) {
            Ok(values) => values,
            Err(err) => {
                report.warn(format!("skipping column '{column}': {err}"));
                continue;
            }
        };
        let mut rejected = 0usize;
        let parsed: Vec<Option<f64>> = raw
            .iter()
            .map(|value| {
                let token = value.as_deref()?;
                let parsed = coerce_token(token);
                if parsed.is_none() && !token.trim().is_empty() {
                    rejected += 1;
                }
                parsed
            })
            .collect();
        if let Err(err) = table.set_float_column(column, parsed) {
            report.warn(format!("skipping column '{column}': {err}"));
            continue;
        }
        if rejected > 0 {
            debug!(column = %column, rejected, "Unparseable numeric tokens became null");
        }
        converted += 1;
    }

    info!(columns = converted, "Coerced numeric columns to floating point");
    Ok(report.finish(table.height()))
}
