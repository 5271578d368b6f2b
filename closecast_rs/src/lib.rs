pub mod columns;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod numeric;
pub mod prepare;
pub mod split;
pub mod stage;
pub mod storage;
pub mod temporal;
pub mod validate;

pub use columns::{ColumnRole, RequiredColumns, ResolvedColumns, ResolverTable};
pub use config::PipelineConfig;
pub use data::RecordTable;
pub use error::{PipelineError, Result};
pub use prepare::{PreparedDataset, prepare_dataset};
pub use split::{ModelingFrame, Partition};
pub use stage::{Stage, StageReport};
