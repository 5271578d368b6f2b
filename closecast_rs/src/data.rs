use std::io::Cursor;
use std::path::Path;

use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::stage::Stage;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// The in-memory record table every stage mutates in place. Row order is
/// the file order until the temporal normalizer re-sorts it by date.
#[derive(Debug, Clone)]
pub struct RecordTable {
    frame: DataFrame,
}

#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub rows: usize,
    pub columns: usize,
    pub sha256: String,
    pub had_bom: bool,
}

/// Rows removed by a null-driven drop, plus columns left out of the check
/// because they hold no values at all.
#[derive(Debug, Clone, Default)]
pub struct NullDrop {
    pub removed: usize,
    pub skipped_all_null: Vec<String>,
}

impl RecordTable {
    /// Read the whole CSV with every column as text so later stages see the
    /// raw exchange tokens (thousands separators, percent signs, etc.).
    pub fn load(path: &Path) -> Result<(Self, LoadSummary)> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let had_bom = bytes.starts_with(UTF8_BOM);
        let body = if had_bom {
            bytes[UTF8_BOM.len()..].to_vec()
        } else {
            bytes
        };

        let frame = CsvReader::new(Cursor::new(body))
            .has_header(true)
            .infer_schema(Some(0))
            .finish()
            .map_err(|source| PipelineError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

        let summary = LoadSummary {
            rows: frame.height(),
            columns: frame.width(),
            sha256,
            had_bom,
        };
        info!(
            rows = summary.rows,
            columns = summary.columns,
            sha256 = %summary.sha256,
            bom = summary.had_bom,
            path = %path.display(),
            "Loaded input CSV"
        );
        Ok((Self { frame }, summary))
    }

    pub fn from_frame(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut DataFrame {
        &mut self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    pub fn is_float(&self, name: &str) -> bool {
        self.frame
            .column(name)
            .map(|series| matches!(series.dtype(), DataType::Float64))
            .unwrap_or(false)
    }

    pub fn null_count(&self, name: &str) -> Result<usize> {
        Ok(self.frame.column(name)?.null_count())
    }

    pub fn text_values(&self, name: &str) -> Result<Vec<Option<String>>> {
        let series = self.frame.column(name)?.cast(&DataType::String)?;
        Ok(series
            .str()?
            .into_iter()
            .map(|value| value.map(str::to_string))
            .collect())
    }

    pub fn float_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        Ok(self.frame.column(name)?.f64()?.into_iter().collect())
    }

    /// Float values with nulls as NaN, for consumers that only need a plain
    /// series (charts, summaries).
    pub fn float_values_with_nans(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self
            .float_values(name)?
            .into_iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect())
    }

    /// Replace (keeping its position) or append a float column.
    pub fn set_float_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        let series = Series::new(name, values);
        self.put_series(name, series)
    }

    pub fn set_text_column(&mut self, name: &str, values: Vec<Option<String>>) -> Result<()> {
        let series = Series::new(name, values);
        self.put_series(name, series)
    }

    fn put_series(&mut self, name: &str, series: Series) -> Result<()> {
        if self.has_column(name) {
            self.frame.replace(name, series)?;
        } else {
            self.frame.with_column(series)?;
        }
        Ok(())
    }

    /// Keep rows whose flag is true; returns the number removed.
    pub fn retain_rows(&mut self, keep: &[bool]) -> Result<usize> {
        let before = self.frame.height();
        if keep.iter().all(|flag| *flag) {
            return Ok(0);
        }
        let mask = BooleanChunked::from_slice("keep", keep);
        self.frame = self.frame.filter(&mask)?;
        Ok(before - self.frame.height())
    }

    /// Rebuild the table from the given row positions, in that order.
    pub fn reorder_rows(&mut self, order: &[usize]) -> Result<()> {
        let indices: Vec<IdxSize> = order.iter().map(|&idx| idx as IdxSize).collect();
        let idx = IdxCa::from_vec("order", indices);
        self.frame = self.frame.take(&idx)?;
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        self.frame = self.frame.drop(name)?;
        Ok(())
    }

    /// Drop every row holding a null in any column. Columns that are
    /// entirely null are left out of the check (and reported) so a single
    /// empty exchange column cannot wipe the table; a drop that would still
    /// remove every row is fatal.
    pub fn drop_rows_with_nulls(&mut self, stage: Stage) -> Result<NullDrop> {
        let height = self.frame.height();
        let mut outcome = NullDrop::default();
        if height == 0 {
            return Ok(outcome);
        }

        let mut keep = vec![true; height];
        let mut any_partial = false;
        for series in self.frame.get_columns() {
            let nulls = series.null_count();
            if nulls == 0 {
                continue;
            }
            if nulls == height {
                outcome.skipped_all_null.push(series.name().to_string());
                continue;
            }
            any_partial = true;
            for (flag, valid) in keep.iter_mut().zip(series.is_not_null().into_iter()) {
                if !valid.unwrap_or(false) {
                    *flag = false;
                }
            }
        }

        if !outcome.skipped_all_null.is_empty() {
            warn!(
                stage = %stage,
                skipped = ?outcome.skipped_all_null,
                "Skipping all-null columns during null-row drop"
            );
        }
        if !any_partial {
            return Ok(outcome);
        }
        if !keep.iter().any(|flag| *flag) {
            return Err(PipelineError::EmptyTable {
                stage,
                detail: "dropping rows with nulls would remove every row".to_string(),
            });
        }
        outcome.removed = self.retain_rows(&keep)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_strips_bom_and_reads_everything_as_text() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("bom.csv");
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"TRADE DATE,CLOSING PRICE\n2024-01-02,\"1,234.50\"\n2024-01-03,12\n");
        std::fs::write(&csv_path, bytes)?;

        let (table, summary) = RecordTable::load(&csv_path)?;
        assert!(summary.had_bom);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.sha256.len(), 64);
        assert_eq!(
            table.column_names(),
            vec!["TRADE DATE".to_string(), "CLOSING PRICE".to_string()]
        );
        assert!(!table.is_float("CLOSING PRICE"));
        assert_eq!(
            table.text_values("CLOSING PRICE")?,
            vec![Some("1,234.50".to_string()), Some("12".to_string())]
        );
        Ok(())
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RecordTable::load(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound(_)));
    }

    #[test]
    fn set_float_column_keeps_column_position() -> anyhow::Result<()> {
        let frame = df!("a" => &["1", "2"], "b" => &["x", "y"])?;
        let mut table = RecordTable::from_frame(frame);
        table.set_float_column("a", vec![Some(1.0), None])?;
        assert_eq!(table.column_names(), vec!["a".to_string(), "b".to_string()]);
        assert!(table.is_float("a"));
        assert_eq!(table.null_count("a")?, 1);
        Ok(())
    }

    #[test]
    fn drop_rows_with_nulls_skips_all_null_columns() -> anyhow::Result<()> {
        let frame = df!(
            "a" => &[Some(1.0), None, Some(3.0)],
            "empty" => &[None::<f64>, None, None]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let outcome = table.drop_rows_with_nulls(Stage::Features)?;
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.skipped_all_null, vec!["empty".to_string()]);
        assert_eq!(table.height(), 2);
        Ok(())
    }

    #[test]
    fn drop_rows_with_nulls_refuses_to_empty_the_table() -> anyhow::Result<()> {
        let frame = df!(
            "a" => &[Some(1.0), None],
            "b" => &[None, Some(2.0)]
        )?;
        let mut table = RecordTable::from_frame(frame);
        let err = table.drop_rows_with_nulls(Stage::Features).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTable { .. }));
        Ok(())
    }
}
