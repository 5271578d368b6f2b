use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

use crate::columns::ColumnRole;
use crate::stage::Stage;

/// Fatal failures. Anything reported through this type aborts the run;
/// recoverable problems travel as warnings on a [`crate::StageReport`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("no column could be resolved for required role {role}")]
    MissingColumn { role: ColumnRole },

    #[error("stage '{stage}' left the table unusable: {detail}")]
    EmptyTable { stage: Stage, detail: String },

    #[error("dataframe operation failed: {0}")]
    Frame(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
