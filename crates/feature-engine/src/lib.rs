//! Feature Engineering Engine
//!
//! Composes fixed-schema feature vectors from validated transactions, causal
//! velocity windows, and dataset statistics frozen from the training partition.

mod features;
mod statistics;
mod transform;

pub use features::{FeatureComposer, FeatureSchema, FeatureVector, STANDARD_COLUMNS};
pub use statistics::{DatasetStats, NormalizationMethod, SummaryStatistics};
pub use transform::{FeatureTransformer, SkippedRecord, TransformConfig, TransformOutput};

use data_validator::SchemaValidationError;
use thiserror::Error;
use velocity_window::OrderingError;

/// Errors during feature computation
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Schema validation failed: {0}")]
    Schema(#[from] SchemaValidationError),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error("Cannot fit dataset statistics: training partition has no amounts")]
    EmptyTrainingPartition,
}
