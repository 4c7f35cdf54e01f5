//! Fraud Scoring Engine
//!
//! Scores feature vectors against a published model artifact and turns the
//! probability into a flag and a risk tier.

mod artifact;
mod engine;

pub use artifact::{
    sigmoid, LogisticParameters, ModelArtifact, RiskTier, RiskTierCuts, ThresholdObjective,
};
pub use engine::{classify, Prediction, Scorer};

use thiserror::Error;

/// Errors during scoring
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Input does not match what the model was trained on
    #[error("Model v{model_version} mismatch: {detail}")]
    ModelVersionMismatch { model_version: u32, detail: String },

    /// The model produced a value that is not a probability
    #[error("Probability {probability} for transaction {transaction_id} is outside [0, 1]")]
    ThresholdOutOfRange {
        transaction_id: String,
        probability: f64,
    },

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),
}
