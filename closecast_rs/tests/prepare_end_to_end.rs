use std::fs;
use std::path::Path;

use anyhow::Result;
use closecast_rs::columns::ColumnRole;
use closecast_rs::{PipelineConfig, PipelineError, Stage, prepare_dataset};
use tempfile::tempdir;

const HEADER: &str = "TRADE DATE,INSTRUMENT NAME,SUSPENDED,OPENING PRICE,HIGHEST PRICE,LOWEST PRICE,\
CLOSING PRICE,TOTAL TRADED VOLUME,TOTAL TRADED VALUE,CHANGE TO PREVIOUS CLOSING (%),VWAP";

const SUSPENDED_DAY: usize = 15;
const CORRUPT_VOLUME_DAY: usize = 20;
const DUPLICATED_DAY: usize = 10;

fn row(day: usize, close: f64, suspended: bool, volume: Option<&str>) -> String {
    let date = format!("2024-01-{:02}", day + 1);
    let volume = volume
        .map(str::to_string)
        .unwrap_or_else(|| format!("\"1,{:03}\"", 100 + day));
    let change = if day % 2 == 0 { "0.45%" } else { "\u{2212}0.40%" };
    format!(
        "{date},THYAO,{},{:.2},{:.2},{:.2},{:.2},{volume},\"{},{:03}.25\",{change},{:.2}",
        u8::from(suspended),
        close - 0.5,
        close + 1.0,
        close - 1.5,
        close,
        50 + day,
        day,
        close,
    )
}

/// 30 data rows: 29 distinct trading days plus one duplicated date, one
/// suspended day and one non-numeric volume token. Two days are written
/// out of order.
fn write_scenario(path: &Path) -> Result<()> {
    let mut lines = vec![HEADER.to_string()];
    for day in 0..29 {
        let close = 100.0 + day as f64;
        let volume = (day == CORRUPT_VOLUME_DAY).then_some("N/A");
        lines.push(row(day, close, day == SUSPENDED_DAY, volume));
        if day == DUPLICATED_DAY {
            lines.push(row(day, 999.0, false, None));
        }
    }
    lines.swap(4, 5);
    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.extend_from_slice(lines.join("\n").as_bytes());
    bytes.push(b'\n');
    fs::write(path, bytes)?;
    Ok(())
}

#[test]
fn synthetic_exchange_file_yields_the_expected_cleaned_table() -> Result<()> {
    let temp_dir = tempdir()?;
    let csv_path = temp_dir.path().join("THYAO.csv");
    write_scenario(&csv_path)?;

    let config = PipelineConfig::with_paths(&csv_path, temp_dir.path().join("out"));
    let prepared = prepare_dataset(&config)?;

    assert_eq!(prepared.load.rows, 30);
    assert!(prepared.load.had_bom);
    assert_eq!(prepared.columns.date, "TRADE DATE");
    assert_eq!(prepared.columns.close, "CLOSING PRICE");
    assert_eq!(prepared.columns.open.as_deref(), Some("OPENING PRICE"));
    assert_eq!(prepared.columns.suspended.as_deref(), Some("SUSPENDED"));

    // 30 - duplicate - suspended - first-row pct_change warm-up.
    let table = &prepared.table;
    assert_eq!(table.height(), 27);

    let dates = table.text_values("TRADE DATE")?;
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted);
    assert!(!dates.contains(&Some("2024-01-16".to_string())));
    assert!(!dates.contains(&Some("2024-01-01".to_string())));

    let closes = table.float_values("CLOSING PRICE")?;
    let duplicated = dates
        .iter()
        .position(|d| d.as_deref() == Some("2024-01-11"))
        .expect("duplicated date survives once");
    assert_eq!(closes[duplicated], Some(110.0));
    assert!(!closes.contains(&Some(999.0)));

    // The N/A volume sits between 1,119 and 1,121 and is interpolated.
    let volumes = table.float_values("TOTAL TRADED VOLUME")?;
    let corrupt = dates
        .iter()
        .position(|d| d.as_deref() == Some("2024-01-21"))
        .expect("corrupt-volume day is kept");
    assert_eq!(volumes[corrupt], Some(1120.0));

    let changes = table.float_values("CHANGE TO PREVIOUS CLOSING (%)")?;
    assert!(changes.iter().all(|c| matches!(c, Some(v) if *v == 0.45 || *v == -0.40)));

    for column in ["daily_return", "pct_change", "moving_average_5", "moving_average_20"] {
        assert_eq!(table.null_count(column)?, 0, "{column}");
    }

    let validate = prepared
        .reports
        .iter()
        .find(|r| r.stage == Stage::Validate)
        .expect("validate report");
    assert_eq!(validate.filled_cells, 1);
    assert_eq!(validate.rows_removed(), 0);

    assert_eq!(prepared.modeling.len(), 26);
    assert_eq!(prepared.partition.train.len(), 20);
    assert_eq!(prepared.partition.test.len(), 6);
    assert_eq!(prepared.modeling.feature_names[0], "OPENING PRICE");
    assert!(
        prepared
            .modeling
            .feature_names
            .iter()
            .any(|name| name == "moving_average_20")
    );
    let last_train = *prepared.partition.train.positions.last().expect("train rows");
    assert!(
        prepared
            .partition
            .test
            .positions
            .iter()
            .all(|pos| *pos > last_train)
    );
    Ok(())
}

#[test]
fn missing_close_column_aborts_with_a_named_error() -> Result<()> {
    let temp_dir = tempdir()?;
    let csv_path = temp_dir.path().join("THYAO.csv");
    fs::write(&csv_path, "TRADE DATE,TOTAL TRADED VOLUME\n2024-01-01,100\n")?;

    let config = PipelineConfig::with_paths(&csv_path, temp_dir.path());
    let err = prepare_dataset(&config).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingColumn {
            role: ColumnRole::ClosePrice
        }
    ));
    Ok(())
}

#[test]
fn missing_input_file_is_fatal() {
    let config = PipelineConfig::with_paths("/nonexistent/THYAO.csv", "/nonexistent/out");
    let err = prepare_dataset(&config).unwrap_err();
    assert!(matches!(err, PipelineError::InputNotFound(_)));
}
