use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::columns::normalize_header;
use crate::data::RecordTable;
use crate::error::{PipelineError, Result};
use crate::split::ModelingFrame;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Tees every written byte into a SHA-256 hasher.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `frame` as a BOM-prefixed UTF-8 CSV and return the SHA-256 of the
/// bytes written.
pub fn write_csv_with_bom(frame: &mut DataFrame, path: &Path) -> Result<String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = HashingWriter::new(io::BufWriter::new(file));
    writer.write_all(UTF8_BOM).map_err(io_error(path))?;
    CsvWriter::new(&mut writer)
        .include_header(true)
        .finish(frame)
        .map_err(|source| PipelineError::Output {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(io_error(path))?;
    let sha256 = writer.finalize_hex();
    info!(
        rows = frame.height(),
        columns = frame.width(),
        sha256 = %sha256,
        path = %path.display(),
        "Wrote CSV"
    );
    Ok(sha256)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub dropped: Vec<String>,
    pub missing: Vec<String>,
}

/// Drop every column named in `denylist`, matching headers case and
/// whitespace insensitively.
pub fn prune_columns(table: &mut RecordTable, denylist: &[String]) -> Result<PruneOutcome> {
    let mut outcome = PruneOutcome::default();
    for requested in denylist {
        let wanted = normalize_header(requested);
        let matches: Vec<String> = table
            .column_names()
            .into_iter()
            .filter(|column| normalize_header(column) == wanted)
            .collect();
        if matches.is_empty() {
            outcome.missing.push(requested.clone());
            continue;
        }
        for column in matches {
            table.drop_column(&column)?;
            outcome.dropped.push(column);
        }
    }
    info!(
        dropped = outcome.dropped.len(),
        not_found = outcome.missing.len(),
        "Pruned denylisted columns"
    );
    if !outcome.dropped.is_empty() {
        info!(columns = ?outcome.dropped, "Dropped columns");
    }
    if !outcome.missing.is_empty() {
        info!(columns = ?outcome.missing, "Denylisted columns not present");
    }
    Ok(outcome)
}

/// Feature columns followed by the target column, one row per sample.
pub fn modeling_frame_to_dataframe(frame: &ModelingFrame, target_column: &str) -> Result<DataFrame> {
    let mut columns: Vec<Series> = frame
        .feature_names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<f64> = frame.features.iter().map(|row| row[idx]).collect();
            Series::new(name, values)
        })
        .collect();
    columns.push(Series::new(target_column, frame.target.clone()));
    Ok(DataFrame::new(columns)?)
}

pub fn write_modeling_frame(frame: &ModelingFrame, target_column: &str, path: &Path) -> Result<String> {
    let mut df = modeling_frame_to_dataframe(frame, target_column)?;
    write_csv_with_bom(&mut df, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn written_csv_starts_with_bom_and_reloads() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("nested").join("out.csv");
        let mut frame = df!("TRADE DATE" => &["2024-01-01"], "CLOSING PRICE" => &[10.5])?;
        let sha = write_csv_with_bom(&mut frame, &path)?;

        let bytes = std::fs::read(&path)?;
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(sha, hex::encode(Sha256::digest(&bytes)));

        let (table, summary) = RecordTable::load(&path)?;
        assert!(summary.had_bom);
        assert_eq!(table.column_names()[0], "TRADE DATE");
        Ok(())
    }

    #[test]
    fn pruning_matches_loosely_and_reports_missing_names() -> anyhow::Result<()> {
        let frame = df!(
            "TRADE DATE" => &["2024-01-01"],
            " instrument  name" => &["THYAO"],
            "VWAP" => &[1.0],
            "CLOSING PRICE" => &[2.0]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let denylist = vec![
            "INSTRUMENT NAME".to_string(),
            "VWAP".to_string(),
            "BIST 30 INDEX".to_string(),
        ];
        let outcome = prune_columns(&mut table, &denylist)?;
        assert_eq!(
            outcome.dropped,
            vec![" instrument  name".to_string(), "VWAP".to_string()]
        );
        assert_eq!(outcome.missing, vec!["BIST 30 INDEX".to_string()]);
        assert_eq!(
            table.column_names(),
            vec!["TRADE DATE".to_string(), "CLOSING PRICE".to_string()]
        );
        Ok(())
    }

    #[test]
    fn modeling_frame_columns_end_with_the_target() -> anyhow::Result<()> {
        let frame = ModelingFrame {
            feature_names: vec!["CLOSING PRICE".to_string(), "pct_change".to_string()],
            features: vec![vec![10.0, 0.1], vec![11.0, 0.2]],
            target: vec![11.0, 12.0],
            positions: vec![0, 1],
            dates: vec![None, None],
        };
        let df = modeling_frame_to_dataframe(&frame, "target_next_close")?;
        assert_eq!(
            df.get_column_names(),
            vec!["CLOSING PRICE", "pct_change", "target_next_close"]
        );
        assert_eq!(df.height(), 2);
        Ok(())
    }
}
