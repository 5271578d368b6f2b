use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::columns::ResolverTable;
use crate::validate::{FillStrategy, ValidationRule};

/// Raw exchange columns that carry no signal for the next-day close model
/// and are removed from the cleaned table before it is written.
pub const DEFAULT_COLUMNS_TO_REMOVE: &[&str] = &[
    "INSTRUMENT NAME",
    "MARKET SEGMENT",
    "MARKET",
    "INSTRUMENT TYPE",
    "INSTRUMENT CLASS",
    "MARKET MAKER",
    "BIST 100 INDEX",
    "BIST 30 INDEX",
    "GROSS SETTLEMENT",
    "REMAINING BID",
    "REMAINING ASK",
    "VWAP",
    "TOTAL NUMBER OF CONTRACTS",
    "REFERENCE PRICE",
    "TRADED VALUE AT OPENING SESSION",
    "TRADED VOLUME AT OPENING SESSION",
    "NUMBER OF CONTRACTS AT OPENING SESSION",
    "TRADED VALUE AT CLOSING SESSION",
    "TRADED VOLUME AT CLOSING SESSION",
    "NUMBER OF CONTRACTS AT CLOSING SESSION",
    "TRADED VALUE OF TRADES AT CLOSING PRICE",
    "TRADED VOLUME OF TRADES AT CLOSING PRICE",
    "NUMBER OF CONTRACTS OF TRADES AT CLOSING PRICE",
    "LOWEST SHORT SALE PRICE",
    "HIGHEST SHORT SALE PRICE",
    "SHORT SALE VWAP",
    "TRADED VALUE OF SHORT SALE TRADES",
    "TRADED VOLUME OF SHORT SALE TRADES",
    "NUMBER OF CONTRACTS OF SHORT SALE TRADES",
    "LOWEST TRADE REPORT PRICE",
    "HIGHEST TRADE REPORT PRICE",
    "TRADE REPORT VWAP",
    "TRADE REPORT TRADED VALUE",
    "TRADE REPORT TRADED VOLUME",
    "NUMBER OF TRADE REPORTS",
];

/// Header keywords that mark a column as numeric and subject to coercion.
pub const DEFAULT_NUMERIC_KEYWORDS: &[&str] = &[
    "PRICE", "VOLUME", "VALUE", "CHANGE", "PERCENT", "RATIO", "AMOUNT", "QUANTITY", "NUMBER",
    "COUNT", "RATE", "INDEX", "BID", "ASK", "OPEN", "CLOSE", "HIGH", "LOW", "AVERAGE", "MEAN",
    "TOTAL",
];

/// Ordered candidate feature columns; the model uses the subset present in
/// the cleaned table, in this order.
pub const DEFAULT_FEATURE_CANDIDATES: &[&str] = &[
    "OPENING PRICE",
    "OPENING SESSION PRICE",
    "LOWEST PRICE",
    "HIGHEST PRICE",
    "CLOSING PRICE",
    "CLOSING SESSION PRICE",
    "REFERENCE PRICE",
    "TOTAL TRADED VOLUME",
    "TOTAL TRADED VALUE",
    "TRADED VOLUME AT OPENING SESSION",
    "TRADED VALUE AT OPENING SESSION",
    "TRADED VOLUME AT CLOSING SESSION",
    "TRADED VALUE AT CLOSING SESSION",
    "TRADED VOLUME OF TRADES AT CLOSING PRICE",
    "TRADED VALUE OF TRADES AT CLOSING PRICE",
    "daily_return",
    "pct_change",
    "moving_average_5",
    "moving_average_20",
    "CHANGE TO PREVIOUS CLOSING (%)",
    "VWAP",
    "TOTAL NUMBER OF CONTRACTS",
    "REMAINING BID",
    "REMAINING ASK",
];

pub const DEFAULT_KNN_K_VALUES: &[usize] = &[3, 5, 7, 9, 11, 15, 20];

fn default_validation_rules() -> Vec<ValidationRule> {
    use FillStrategy::{ForwardBack, InterpolateForwardBack};
    vec![
        ValidationRule::new("PRICE", Some(0.0), false, ForwardBack),
        ValidationRule::new("VOLUME", Some(0.0), false, InterpolateForwardBack),
        ValidationRule::new("VALUE", Some(0.0), false, InterpolateForwardBack),
        ValidationRule::new("CHANGE", None, true, ForwardBack),
        ValidationRule::new("PERCENT", None, true, ForwardBack),
        ValidationRule::new("OPEN", Some(0.0), false, ForwardBack),
        ValidationRule::new("CLOSE", Some(0.0), false, ForwardBack),
        ValidationRule::new("HIGH", Some(0.0), false, ForwardBack),
        ValidationRule::new("LOW", Some(0.0), false, ForwardBack),
    ]
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactNames {
    pub cleaned_csv: String,
    pub train_csv: String,
    pub test_csv: String,
    pub trend_chart: String,
    pub return_histogram_chart: String,
    pub prediction_chart: String,
    pub knn_sweep_chart: String,
    pub log_file: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            cleaned_csv: "THYAO_clean.csv".to_string(),
            train_csv: "THYAO_train.csv".to_string(),
            test_csv: "THYAO_test.csv".to_string(),
            trend_chart: "THYAO_closing_price_trend.svg".to_string(),
            return_histogram_chart: "THYAO_daily_return_distribution.svg".to_string(),
            prediction_chart: "THYAO_real_vs_prediction.svg".to_string(),
            knn_sweep_chart: "THYAO_knn_k_comparison.svg".to_string(),
            log_file: "closecast.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_csv: PathBuf,
    /// Directory receiving every artifact (CSVs, charts, log file).
    pub output_dir: PathBuf,
    #[serde(default)]
    pub artifacts: ArtifactNames,
    /// When true the binary also writes its log to `output_dir`.
    #[serde(default = "default_true")]
    pub file_log: bool,
    pub columns_to_remove: Vec<String>,
    pub resolver: ResolverTable,
    pub numeric_keywords: Vec<String>,
    /// Keyword-matched fill and bound rules, applied in order.
    pub validation_rules: Vec<ValidationRule>,
    pub feature_candidates: Vec<String>,
    /// Header of the next-day close column in the written train/test splits.
    pub target_column: String,
    /// Share of the labelled rows (by position) used for training.
    pub train_fraction: f64,
    pub short_window: usize,
    pub long_window: usize,
    pub knn_k_values: Vec<usize>,
    /// k used for the final nearest-neighbour fit when no candidate could
    /// be scored.
    pub fallback_k: usize,
    pub histogram_bins: usize,
    #[serde(default = "default_true")]
    pub run_models: bool,
    #[serde(default = "default_true")]
    pub render_charts: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_csv: PathBuf::from("THYAO.csv"),
            output_dir: PathBuf::from("closecast_output"),
            artifacts: ArtifactNames::default(),
            file_log: true,
            columns_to_remove: to_strings(DEFAULT_COLUMNS_TO_REMOVE),
            resolver: ResolverTable::default(),
            numeric_keywords: to_strings(DEFAULT_NUMERIC_KEYWORDS),
            validation_rules: default_validation_rules(),
            feature_candidates: to_strings(DEFAULT_FEATURE_CANDIDATES),
            target_column: "target_next_close".to_string(),
            train_fraction: 0.8,
            short_window: 5,
            long_window: 20,
            knn_k_values: DEFAULT_KNN_K_VALUES.to_vec(),
            fallback_k: 5,
            histogram_bins: 50,
            run_models: true,
            render_charts: true,
        }
    }
}

impl PipelineConfig {
    pub fn with_paths(input_csv: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_csv: input_csv.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    pub fn cleaned_csv_path(&self) -> PathBuf {
        self.artifact_path(&self.artifacts.cleaned_csv)
    }

    pub fn train_csv_path(&self) -> PathBuf {
        self.artifact_path(&self.artifacts.train_csv)
    }

    pub fn test_csv_path(&self) -> PathBuf {
        self.artifact_path(&self.artifacts.test_csv)
    }

    pub fn log_path(&self) -> PathBuf {
        self.artifact_path(&self.artifacts.log_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_fixed_rule_tables() {
        let config = PipelineConfig::default();
        assert_eq!(config.numeric_keywords.len(), 21);
        assert_eq!(config.validation_rules.len(), 9);
        assert_eq!(config.knn_k_values, vec![3, 5, 7, 9, 11, 15, 20]);
        assert!(config.columns_to_remove.iter().any(|c| c == "GROSS SETTLEMENT"));
        assert!(
            !config
                .columns_to_remove
                .iter()
                .any(|c| c == "CLOSING SESSION PRICE")
        );
        assert_eq!(config.train_fraction, 0.8);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = PipelineConfig::with_paths("in.csv", "out");
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.input_csv, PathBuf::from("in.csv"));
        assert_eq!(back.cleaned_csv_path(), PathBuf::from("out").join("THYAO_clean.csv"));
        assert_eq!(back.resolver, config.resolver);
    }
}
