use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    ResolveColumns,
    NormalizeDates,
    FilterSuspended,
    CoerceNumeric,
    Validate,
    Features,
    RepairMissing,
    SplitTarget,
    Partition,
    Models,
    Charts,
    Write,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::ResolveColumns => "resolve_columns",
            Stage::NormalizeDates => "normalize_dates",
            Stage::FilterSuspended => "filter_suspended",
            Stage::CoerceNumeric => "coerce_numeric",
            Stage::Validate => "validate",
            Stage::Features => "features",
            Stage::RepairMissing => "repair_missing",
            Stage::SplitTarget => "split_target",
            Stage::Partition => "partition",
            Stage::Models => "models",
            Stage::Charts => "charts",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a stage that completed, possibly after silent repairs or
/// degrade-and-continue fallbacks.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Null cells replaced by imputation.
    pub filled_cells: usize,
    pub warnings: Vec<String>,
}

impl StageReport {
    pub fn begin(stage: Stage, rows_before: usize) -> Self {
        Self {
            stage,
            rows_before,
            rows_after: rows_before,
            filled_cells: 0,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(stage = %self.stage, "{message}");
        self.warnings.push(message);
    }

    pub fn finish(mut self, rows_after: usize) -> Self {
        self.rows_after = rows_after;
        info!(
            stage = %self.stage,
            rows_before = self.rows_before,
            rows_after = self.rows_after,
            removed = self.rows_removed(),
            filled = self.filled_cells,
            warnings = self.warnings.len(),
            "Stage complete"
        );
        self
    }

    pub fn rows_removed(&self) -> usize {
        self.rows_before.saturating_sub(self.rows_after)
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
