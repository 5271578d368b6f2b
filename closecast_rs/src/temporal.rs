use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::info;

use crate::data::RecordTable;
use crate::error::Result;
use crate::stage::{Stage, StageReport};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a trade date in any of the layouts exchange exports use. Returns
/// `None` for anything unrecognised rather than failing the row.
pub fn parse_trade_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(stamp.date());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|stamp| stamp.date_naive())
}

/// Sort rows ascending by trade date and keep the first row per date.
///
/// Rows whose date does not parse keep their relative order after every
/// dated row, and they share a single dedup key, so at most one of them
/// survives. The date column is rewritten as `YYYY-MM-DD` text (null for
/// the unparsed survivor).
pub fn normalize_dates(table: &mut RecordTable, date_column: &str) -> Result<StageReport> {
    let mut report = StageReport::begin(Stage::NormalizeDates, table.height());
    let raw = table.text_values(date_column)?;
    let parsed: Vec<Option<NaiveDate>> = raw
        .iter()
        .map(|value| value.as_deref().and_then(parse_trade_date))
        .collect();

    let unparsed = parsed.iter().filter(|date| date.is_none()).count();
    if unparsed > 0 {
        report.warn(format!(
            "{unparsed} value(s) in '{date_column}' could not be parsed as dates"
        ));
    }

    let mut order: Vec<usize> = (0..parsed.len()).collect();
    // `None` sorts after every date; sort_by_key is stable.
    order.sort_by_key(|&idx| (parsed[idx].is_none(), parsed[idx]));

    let mut seen: HashSet<Option<NaiveDate>> = HashSet::with_capacity(order.len());
    order.retain(|&idx| seen.insert(parsed[idx]));

    let duplicates = parsed.len() - order.len();
    table.reorder_rows(&order)?;
    let normalized: Vec<Option<String>> = order
        .iter()
        .map(|&idx| parsed[idx].map(|date| date.format("%Y-%m-%d").to_string()))
        .collect();
    table.set_text_column(date_column, normalized)?;

    info!(
        column = date_column,
        duplicates,
        rows = table.height(),
        "Sorted by trade date and removed duplicate dates"
    );
    Ok(report.finish(table.height()))
}

fn is_suspended(raw: &str) -> bool {
    let token = raw.trim();
    if token.eq_ignore_ascii_case("true") {
        return true;
    }
    token.parse::<f64>().map(|value| value == 1.0).unwrap_or(false)
}

/// Remove rows whose suspended flag is set. Without a flag column the
/// stage only records a warning.
pub fn filter_suspended(table: &mut RecordTable, flag_column: Option<&str>) -> Result<StageReport> {
    let mut report = StageReport::begin(Stage::FilterSuspended, table.height());
    let Some(column) = flag_column else {
        report.warn("no suspended-flag column found; suspended rows were not filtered");
        return Ok(report.finish(table.height()));
    };

    let keep: Vec<bool> = table
        .text_values(column)?
        .iter()
        .map(|value| !value.as_deref().is_some_and(is_suspended))
        .collect();
    let removed = table.retain_rows(&keep)?;
    info!(column, removed, "Filtered suspended trading days");
    Ok(report.finish(table.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn table(dates: &[Option<&str>], closes: &[&str]) -> RecordTable {
        let frame = df!("TRADE DATE" => dates, "CLOSING PRICE" => closes).unwrap();
        RecordTable::from_frame(frame)
    }

    #[test]
    fn parses_exchange_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7);
        for raw in [
            "2024-03-07",
            " 2024-03-07 ",
            "07.03.2024",
            "07/03/2024",
            "2024/03/07",
            "2024-03-07 00:00:00",
            "2024-03-07T15:30:00+03:00",
        ] {
            assert_eq!(parse_trade_date(raw), expected, "raw {raw:?}");
        }
        assert_eq!(parse_trade_date("not a date"), None);
        assert_eq!(parse_trade_date(""), None);
    }

    #[test]
    fn duplicate_dates_keep_the_first_post_sort_row() -> anyhow::Result<()> {
        let mut table = table(
            &[Some("2024-01-03"), Some("2024-01-02"), Some("2024-01-03"), Some("2024-01-01")],
            &["30", "20", "31", "10"],
        );
        let report = normalize_dates(&mut table, "TRADE DATE")?;
        assert_eq!(report.rows_removed(), 1);
        assert_eq!(
            table.text_values("TRADE DATE")?,
            vec![
                Some("2024-01-01".to_string()),
                Some("2024-01-02".to_string()),
                Some("2024-01-03".to_string()),
            ]
        );
        assert_eq!(
            table.text_values("CLOSING PRICE")?,
            vec![Some("10".to_string()), Some("20".to_string()), Some("30".to_string())]
        );
        Ok(())
    }

    #[test]
    fn unparsed_dates_sort_last_and_collapse_to_one_row() -> anyhow::Result<()> {
        let mut table = table(
            &[Some("garbage"), Some("2024-01-02"), None, Some("01.01.2024")],
            &["a", "b", "c", "d"],
        );
        let report = normalize_dates(&mut table, "TRADE DATE")?;
        assert!(report.has_warnings());
        assert_eq!(
            table.text_values("TRADE DATE")?,
            vec![Some("2024-01-01".to_string()), Some("2024-01-02".to_string()), None]
        );
        assert_eq!(
            table.text_values("CLOSING PRICE")?,
            vec![Some("d".to_string()), Some("b".to_string()), Some("a".to_string())]
        );
        Ok(())
    }

    #[test]
    fn suspended_rows_are_removed() -> anyhow::Result<()> {
        let frame = df!(
            "SUSPENDED" => &[Some("0"), Some("1"), None, Some("1.0"), Some("TRUE"), Some("false")],
            "CLOSING PRICE" => &["1", "2", "3", "4", "5", "6"]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let report = filter_suspended(&mut table, Some("SUSPENDED"))?;
        assert_eq!(report.rows_removed(), 3);
        assert_eq!(
            table.text_values("CLOSING PRICE")?,
            vec![Some("1".to_string()), Some("3".to_string()), Some("6".to_string())]
        );
        Ok(())
    }

    #[test]
    fn missing_flag_column_is_only_a_warning() -> anyhow::Result<()> {
        let mut table = table(&[Some("2024-01-01")], &["1"]);
        let report = filter_suspended(&mut table, None)?;
        assert!(report.has_warnings());
        assert_eq!(table.height(), 1);
        Ok(())
    }
}
