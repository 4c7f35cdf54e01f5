//! Fraud Detection Pipeline
//!
//! Orchestrates the four batch steps over the SQLite stores and the model
//! registry: load raw transactions, build the feature table, train a model,
//! and score every transaction.

pub mod config;
mod orchestrator;
mod stages;

pub use config::PipelineConfig;
pub use orchestrator::{
    Artifact, Orchestrator, PipelineStep, StageOutcome, StageRunner, StepReport, StepSelector,
    StepState,
};
pub use stages::PipelineStages;

use feature_engine::FeatureError;
use inference_engine::InferenceError;
use storage::StorageError;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use trainer::TrainError;

/// Errors that stop a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid step {0:?}: expected 1-4 or 'all'")]
    InvalidStep(String),
    #[error("Cannot run {step}: {artifact} missing or empty")]
    MissingArtifact { step: PipelineStep, artifact: Artifact },
    /// A step's own work failed; `source` holds the cause
    #[error("{step} failed")]
    Step {
        step: PipelineStep,
        #[source]
        source: Box<PipelineError>,
    },
    #[error("Feature table has no {0:?} column")]
    MissingColumn(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
    #[error("Training error: {0}")]
    Train(#[from] TrainError),
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Install the global tracing subscriber
pub fn init_logging(level: &str, json: bool) -> Result<(), PipelineError> {
    let level: Level = level
        .parse()
        .map_err(|_| PipelineError::Logging(format!("unknown log level {level:?}")))?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| PipelineError::Logging(e.to_string()))
}
