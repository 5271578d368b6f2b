use tracing::{info, warn};

use crate::data::RecordTable;
use crate::error::Result;
use crate::numeric::column_as_f64;
use crate::stage::{Stage, StageReport};

pub const DAILY_RETURN: &str = "daily_return";
pub const PCT_CHANGE: &str = "pct_change";

pub fn moving_average_column(window: usize) -> String {
    format!("moving_average_{window}")
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Period-over-period relative change. The first row, and any row whose
/// previous value is missing or zero, is undefined.
pub fn pct_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    for i in 1..values.len() {
        if let (Some(prev), Some(current)) = (values[i - 1], values[i]) {
            if prev != 0.0 {
                result[i] = finite(current / prev - 1.0);
            }
        }
    }
    result
}

/// `(close - open) / open`, row by row.
pub fn intraday_return(close: &[Option<f64>], open: &[Option<f64>]) -> Vec<Option<f64>> {
    close
        .iter()
        .zip(open.iter())
        .map(|(c, o)| match (c, o) {
            (Some(c), Some(o)) if *o != 0.0 => finite((c - o) / o),
            _ => None,
        })
        .collect()
}

/// Trailing mean over at most `window` rows. The window shrinks at the
/// start of the series (minimum one observation) and nulls inside the
/// window are skipped.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let (sum, count) = values[start..=i]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

/// Append the four derived series, then drop every row that still holds a
/// null anywhere in the table.
pub fn compute_features(
    table: &mut RecordTable,
    close_column: &str,
    open_column: Option<&str>,
    short_window: usize,
    long_window: usize,
) -> Result<StageReport> {
    let mut report = StageReport::begin(Stage::Features, table.height());
    let close = column_as_f64(table, close_column)?;

    let open_column = open_column.filter(|open| *open != close_column);
    let daily_return = match open_column {
        Some(open_column) => {
            let open = column_as_f64(table, open_column)?;
            intraday_return(&close, &open)
        }
        None => {
            report.warn(format!(
                "no opening price column; {DAILY_RETURN} uses the change of '{close_column}'"
            ));
            pct_change(&close)
        }
    };

    table.set_float_column(DAILY_RETURN, daily_return)?;
    table.set_float_column(PCT_CHANGE, pct_change(&close))?;
    table.set_float_column(&moving_average_column(short_window), rolling_mean(&close, short_window))?;
    table.set_float_column(&moving_average_column(long_window), rolling_mean(&close, long_window))?;
    info!(
        close = close_column,
        open = open_column.unwrap_or("-"),
        short_window,
        long_window,
        "Computed derived features"
    );

    let dropped = table.drop_rows_with_nulls(Stage::Features)?;
    for column in &dropped.skipped_all_null {
        report.warn(format!("column '{column}' is entirely null"));
    }
    if dropped.removed > 0 {
        warn!(removed = dropped.removed, "Dropped warm-up and residual null rows");
    }
    Ok(report.finish(table.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn moving_average_uses_a_shrinking_window() {
        let close = some(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let ma = rolling_mean(&close, 5);
        assert_eq!(ma[0], Some(10.0));
        assert_eq!(ma[1], Some(10.5));
        assert_eq!(ma[4], Some(12.0));

        let ma = rolling_mean(&close, 2);
        assert_eq!(ma[4], Some(13.5));
    }

    #[test]
    fn pct_change_is_undefined_for_the_first_row_and_zero_bases() {
        let values = vec![Some(10.0), Some(11.0), Some(0.0), Some(5.0), None, Some(6.0)];
        let change = pct_change(&values);
        assert_eq!(change[0], None);
        assert!((change[1].unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(change[2], Some(-1.0));
        assert_eq!(change[3], None);
        assert_eq!(change[4], None);
        assert_eq!(change[5], None);
    }

    #[test]
    fn intraday_return_uses_open_and_close() -> anyhow::Result<()> {
        let frame = df!(
            "OPENING PRICE" => &[10.0, 20.0, 25.0],
            "CLOSING PRICE" => &[11.0, 22.0, 20.0]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let report = compute_features(&mut table, "CLOSING PRICE", Some("OPENING PRICE"), 5, 20)?;

        // The first row has no pct_change and is dropped.
        assert_eq!(report.rows_removed(), 1);
        assert!(!report.has_warnings());
        let returns = table.float_values(DAILY_RETURN)?;
        assert!((returns[0].unwrap() - 0.1).abs() < 1e-12);
        assert!((returns[1].unwrap() + 0.2).abs() < 1e-12);
        assert_eq!(
            table.float_values("moving_average_20")?,
            vec![Some(16.5), Some(53.0 / 3.0)]
        );
        Ok(())
    }

    #[test]
    fn missing_open_switches_to_close_over_close_return() -> anyhow::Result<()> {
        let frame = df!("CLOSE" => &[10.0, 12.0, 9.0])?;
        let mut table = RecordTable::from_frame(frame);
        let report = compute_features(&mut table, "CLOSE", None, 5, 20)?;
        assert!(report.has_warnings());
        assert_eq!(table.height(), 2);
        assert_eq!(
            table.float_values(DAILY_RETURN)?,
            table.float_values(PCT_CHANGE)?
        );
        Ok(())
    }

    #[test]
    fn zero_open_price_never_produces_infinities() {
        let returns = intraday_return(&some(&[1.0, 2.0]), &some(&[0.0, 1.0]));
        assert_eq!(returns, vec![None, Some(1.0)]);
    }
}
