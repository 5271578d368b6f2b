//! Ordinary least squares and k-nearest-neighbour regressors fitted on the
//! chronological train split and scored on both splits.

use std::fmt;

use closecast_rs::{ModelingFrame, Partition, Stage, StageReport};
use serde::Serialize;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{
    LinearRegression, LinearRegressionParameters, LinearRegressionSolverName,
};
use smartcore::metrics::distance::euclidian::Euclidian;
use smartcore::neighbors::knn_regressor::{KNNRegressor, KNNRegressorParameters};
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics::RegressionMetrics;

/// Failures that skip a model without aborting the run.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("no feature columns are available")]
    NoFeatures,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("training {model} failed: {reason}")]
    TrainingFailed { model: ModelKind, reason: String },

    #[error("prediction with {model} failed: {reason}")]
    PredictionFailed { model: ModelKind, reason: String },

    #[error("k={k} exceeds the {train_rows} training rows")]
    NeighbourhoodTooLarge { k: usize, train_rows: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    LinearRegression,
    Knn { k: usize },
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::LinearRegression => f.write_str("Linear Regression"),
            ModelKind::Knn { k } => write!(f, "KNN (k={k})"),
        }
    }
}

type LinearModel = LinearRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>;
type KnnModel = KNNRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>, Euclidian<f64>>;

enum FittedModel {
    Linear(LinearModel),
    Knn(KnnModel),
}

fn to_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>, ModelError> {
    let rows = rows.to_vec();
    DenseMatrix::from_2d_vec(&rows)
        .map_err(|e| ModelError::InvalidData(format!("failed to create feature matrix: {e:?}")))
}

fn check_training_set(train: &ModelingFrame) -> Result<(), ModelError> {
    if train.feature_names.is_empty() {
        return Err(ModelError::NoFeatures);
    }
    if train.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    Ok(())
}

impl FittedModel {
    fn fit(kind: ModelKind, train: &ModelingFrame) -> Result<Self, ModelError> {
        check_training_set(train)?;
        let x = to_matrix(&train.features)?;
        let y = train.target.clone();
        let failed = |e: smartcore::error::Failed| ModelError::TrainingFailed {
            model: kind,
            reason: format!("{e}"),
        };
        match kind {
            ModelKind::LinearRegression => {
                let params =
                    LinearRegressionParameters::default().with_solver(LinearRegressionSolverName::SVD);
                LinearRegression::fit(&x, &y, params)
                    .map(FittedModel::Linear)
                    .map_err(failed)
            }
            ModelKind::Knn { k } => {
                if k == 0 || k > train.len() {
                    return Err(ModelError::NeighbourhoodTooLarge {
                        k,
                        train_rows: train.len(),
                    });
                }
                KNNRegressor::fit(&x, &y, KNNRegressorParameters::default().with_k(k))
                    .map(FittedModel::Knn)
                    .map_err(failed)
            }
        }
    }

    fn predict(&self, kind: ModelKind, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = to_matrix(rows)?;
        let predicted = match self {
            FittedModel::Linear(model) => model.predict(&x),
            FittedModel::Knn(model) => model.predict(&x),
        };
        predicted.map_err(|e| ModelError::PredictionFailed {
            model: kind,
            reason: format!("{e}"),
        })
    }
}

/// One fitted model with its predictions and scores on both splits.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEvaluation {
    pub kind: ModelKind,
    pub train: Option<RegressionMetrics>,
    /// `None` when the test split is empty.
    pub test: Option<RegressionMetrics>,
    pub train_predictions: Vec<f64>,
    pub test_predictions: Vec<f64>,
}

impl ModelEvaluation {
    pub fn test_r2(&self) -> Option<f64> {
        self.test.map(|m| m.r2)
    }
}

pub fn evaluate_model(kind: ModelKind, partition: &Partition) -> Result<ModelEvaluation, ModelError> {
    let model = FittedModel::fit(kind, &partition.train)?;
    let train_predictions = model.predict(kind, &partition.train.features)?;
    let test_predictions = model.predict(kind, &partition.test.features)?;
    let evaluation = ModelEvaluation {
        kind,
        train: RegressionMetrics::compute(&partition.train.target, &train_predictions),
        test: RegressionMetrics::compute(&partition.test.target, &test_predictions),
        train_predictions,
        test_predictions,
    };
    info!(
        model = %kind,
        train_r2 = evaluation.train.map(|m| m.r2),
        test_r2 = evaluation.test_r2(),
        "Evaluated model"
    );
    Ok(evaluation)
}

/// Held-out scores for one neighbourhood size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KnnSweepEntry {
    pub k: usize,
    pub metrics: RegressionMetrics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KnnSweep {
    pub entries: Vec<KnnSweepEntry>,
    /// Candidates that could not be scored, with the reason.
    pub skipped: Vec<(usize, String)>,
}

impl KnnSweep {
    /// Highest test R²; the earliest candidate wins ties.
    pub fn best(&self) -> Option<&KnnSweepEntry> {
        self.entries.iter().fold(None, |best: Option<&KnnSweepEntry>, entry| match best {
            Some(current) if current.metrics.r2 >= entry.metrics.r2 => Some(current),
            _ => Some(entry),
        })
    }
}

pub fn sweep_knn(partition: &Partition, k_values: &[usize]) -> KnnSweep {
    let mut sweep = KnnSweep::default();
    for &k in k_values {
        let scored = evaluate_model(ModelKind::Knn { k }, partition).and_then(|evaluation| {
            evaluation.test.ok_or_else(|| {
                ModelError::InvalidData("test split is empty; nothing to score".to_string())
            })
        });
        match scored {
            Ok(metrics) => {
                debug!(k, r2 = metrics.r2, rmse = metrics.rmse, "Scored KNN candidate");
                sweep.entries.push(KnnSweepEntry { k, metrics });
            }
            Err(err) => sweep.skipped.push((k, err.to_string())),
        }
    }
    sweep
}

/// Results of the model stage. Each model is independent: a failure of
/// one is recorded as a warning and leaves the other intact.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSuite {
    pub linear: Option<ModelEvaluation>,
    pub sweep: KnnSweep,
    pub best_k: usize,
    pub knn: Option<ModelEvaluation>,
    pub report: StageReport,
}

impl ModelSuite {
    /// The evaluated model with the highest test R².
    pub fn best_model(&self) -> Option<&ModelEvaluation> {
        [self.linear.as_ref(), self.knn.as_ref()]
            .into_iter()
            .flatten()
            .filter(|evaluation| evaluation.test.is_some())
            .fold(None, |best: Option<&ModelEvaluation>, candidate| match best {
                Some(current) if current.test_r2() >= candidate.test_r2() => Some(current),
                _ => Some(candidate),
            })
    }
}

pub fn run_models(partition: &Partition, k_values: &[usize], fallback_k: usize) -> ModelSuite {
    let rows = partition.train.len() + partition.test.len();
    let mut report = StageReport::begin(Stage::Models, rows);

    let linear = match evaluate_model(ModelKind::LinearRegression, partition) {
        Ok(evaluation) => Some(evaluation),
        Err(err) => {
            report.warn(format!("linear regression skipped: {err}"));
            None
        }
    };

    let sweep = sweep_knn(partition, k_values);
    for (k, reason) in &sweep.skipped {
        report.warn(format!("k={k} skipped: {reason}"));
    }
    let best_k = match sweep.best() {
        Some(entry) => entry.k,
        None => {
            report.warn(format!("no KNN candidate could be scored; using k={fallback_k}"));
            fallback_k
        }
    };
    info!(best_k, candidates = sweep.entries.len(), "Selected KNN neighbourhood size");

    let knn = match evaluate_model(ModelKind::Knn { k: best_k }, partition) {
        Ok(evaluation) => Some(evaluation),
        Err(err) => {
            report.warn(format!("KNN regression skipped: {err}"));
            None
        }
    };

    ModelSuite {
        linear,
        sweep,
        best_k,
        knn,
        report: report.finish(rows),
    }
}
