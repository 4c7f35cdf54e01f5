//! Scorer Implementation

use crate::artifact::{ModelArtifact, RiskTier, RiskTierCuts};
use crate::InferenceError;
use chrono::{DateTime, Utc};
use feature_engine::{DatasetStats, FeatureVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

/// One scored transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: Uuid,
    pub transaction_id: String,
    /// Fraud probability in [0, 1]
    pub probability: f64,
    /// `probability >= threshold`
    pub is_fraud: bool,
    pub risk_tier: RiskTier,
    /// Threshold the flag was derived from
    pub threshold: f64,
    pub model_version: u32,
    pub predicted_at: DateTime<Utc>,
}

/// Flag and tier for a probability.
///
/// The flag is inclusive at the threshold.
pub fn classify(probability: f64, threshold: f64, cuts: &RiskTierCuts) -> (bool, RiskTier) {
    (
        probability >= threshold,
        RiskTier::from_probability(probability, cuts),
    )
}

/// Scores feature vectors against one published model
#[derive(Debug, Clone)]
pub struct Scorer {
    artifact: ModelArtifact,
}

impl Scorer {
    /// Create a scorer, rejecting inconsistent artifacts
    pub fn new(artifact: ModelArtifact) -> Result<Self, InferenceError> {
        artifact.validate()?;
        info!(
            model_version = artifact.version,
            features = artifact.schema.len(),
            threshold = artifact.threshold,
            "Scorer ready"
        );
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn model_version(&self) -> u32 {
        self.artifact.version
    }

    /// Ensure a feature table was built with the statistics this model was
    /// trained with
    pub fn check_dataset_stats(&self, stats: &DatasetStats) -> Result<(), InferenceError> {
        if stats != &self.artifact.dataset_stats {
            return Err(InferenceError::ModelVersionMismatch {
                model_version: self.artifact.version,
                detail: format!(
                    "feature table normalised with {:?} ({} rows), model trained with {:?} ({} rows)",
                    stats.method(),
                    stats.sample_count(),
                    self.artifact.dataset_stats.method(),
                    self.artifact.dataset_stats.sample_count()
                ),
            });
        }
        Ok(())
    }

    /// Fraud probability for one vector
    pub fn score(&self, features: &FeatureVector) -> Result<f64, InferenceError> {
        let schema = &self.artifact.schema;
        if &features.schema != schema {
            return Err(InferenceError::ModelVersionMismatch {
                model_version: self.artifact.version,
                detail: format!(
                    "transaction {} has {} features (missing {:?}, unexpected {:?}), model expects {}",
                    features.transaction_id,
                    features.schema.len(),
                    schema.missing_from(&features.schema),
                    features.schema.missing_from(schema),
                    schema.len()
                ),
            });
        }
        if features.values.len() != schema.len() {
            return Err(InferenceError::ModelVersionMismatch {
                model_version: self.artifact.version,
                detail: format!(
                    "transaction {} carries {} values for {} columns",
                    features.transaction_id,
                    features.values.len(),
                    schema.len()
                ),
            });
        }

        let probability = self.artifact.parameters.probability(&features.values);
        if !(0.0..=1.0).contains(&probability) {
            error!(
                transaction_id = %features.transaction_id,
                probability,
                model_version = self.artifact.version,
                "Model produced an out-of-range probability"
            );
            return Err(InferenceError::ThresholdOutOfRange {
                transaction_id: features.transaction_id.clone(),
                probability,
            });
        }
        Ok(probability)
    }

    /// Score and classify one vector
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, InferenceError> {
        let probability = self.score(features)?;
        let (is_fraud, risk_tier) =
            classify(probability, self.artifact.threshold, &self.artifact.risk_tiers);
        debug!(
            transaction_id = %features.transaction_id,
            probability,
            %risk_tier,
            "Transaction scored"
        );

        Ok(Prediction {
            prediction_id: Uuid::new_v4(),
            transaction_id: features.transaction_id.clone(),
            probability,
            is_fraud,
            risk_tier,
            threshold: self.artifact.threshold,
            model_version: self.artifact.version,
            predicted_at: Utc::now(),
        })
    }
}
