use std::fmt;

use serde::Serialize;

/// Standard regression error metrics for one model on one row set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    /// `None` when there is nothing to score or the series lengths differ.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        let n = actual.len();
        if n == 0 || n != predicted.len() {
            return None;
        }
        let count = n as f64;
        let mse = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).powi(2))
            .sum::<f64>()
            / count;
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).abs())
            .sum::<f64>()
            / count;
        let mean = actual.iter().sum::<f64>() / count;
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        let ss_res = mse * count;
        // A constant target scores 1.0 only for a perfect fit.
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };
        Some(Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
        })
    }

    pub fn label(&self) -> PerformanceLabel {
        PerformanceLabel::from_r2(self.r2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLabel {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl PerformanceLabel {
    pub fn from_r2(r2: f64) -> Self {
        if r2 > 0.7 {
            PerformanceLabel::Excellent
        } else if r2 > 0.5 {
            PerformanceLabel::Good
        } else if r2 > 0.3 {
            PerformanceLabel::Moderate
        } else {
            PerformanceLabel::Poor
        }
    }
}

impl fmt::Display for PerformanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PerformanceLabel::Excellent => "excellent",
            PerformanceLabel::Good => "good",
            PerformanceLabel::Moderate => "moderate",
            PerformanceLabel::Poor => "poor",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_match_hand_computed_values() {
        let actual = [3.0, -0.5, 2.0, 7.0];
        let predicted = [2.5, 0.0, 2.0, 8.0];
        let metrics = RegressionMetrics::compute(&actual, &predicted).unwrap();
        assert!((metrics.mse - 0.375).abs() < 1e-12);
        assert!((metrics.rmse - 0.375f64.sqrt()).abs() < 1e-12);
        assert!((metrics.mae - 0.5).abs() < 1e-12);
        assert!((metrics.r2 - 0.948_608_137_044_967_9).abs() < 1e-9);
    }

    #[test]
    fn empty_or_mismatched_series_have_no_metrics() {
        assert!(RegressionMetrics::compute(&[], &[]).is_none());
        assert!(RegressionMetrics::compute(&[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn constant_targets_do_not_divide_by_zero() {
        let perfect = RegressionMetrics::compute(&[2.0, 2.0], &[2.0, 2.0]).unwrap();
        assert_eq!(perfect.r2, 1.0);
        let off = RegressionMetrics::compute(&[2.0, 2.0], &[1.0, 3.0]).unwrap();
        assert_eq!(off.r2, 0.0);
    }

    #[test]
    fn labels_follow_r2_thresholds() {
        assert_eq!(PerformanceLabel::from_r2(0.71), PerformanceLabel::Excellent);
        assert_eq!(PerformanceLabel::from_r2(0.7), PerformanceLabel::Good);
        assert_eq!(PerformanceLabel::from_r2(0.31), PerformanceLabel::Moderate);
        assert_eq!(PerformanceLabel::from_r2(0.3), PerformanceLabel::Poor);
        assert_eq!(PerformanceLabel::from_r2(-2.0), PerformanceLabel::Poor);
    }
}
