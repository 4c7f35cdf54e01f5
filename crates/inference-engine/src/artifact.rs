//! Model Artifact

use crate::InferenceError;
use chrono::{DateTime, Utc};
use feature_engine::{DatasetStats, FeatureSchema};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Risk tier assigned to a scored transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Determine the tier of a probability
    pub fn from_probability(probability: f64, cuts: &RiskTierCuts) -> Self {
        if probability >= cuts.high {
            RiskTier::High
        } else if probability >= cuts.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        }
    }
}

impl FromStr for RiskTier {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskTier::Low),
            "MEDIUM" => Ok(RiskTier::Medium),
            "HIGH" => Ok(RiskTier::High),
            other => Err(InferenceError::InvalidArtifact(format!("unknown risk tier {other:?}"))),
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower probability bounds of the Medium and High tiers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskTierCuts {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskTierCuts {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.7,
        }
    }
}

/// Criterion used to pick the operating threshold
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdObjective {
    /// Maximise F1 on the validation partition
    #[default]
    F1,
    /// Minimise total misclassification cost on the validation partition
    Cost {
        false_positive_cost: f64,
        false_negative_cost: f64,
    },
}

/// Fitted logistic regression over standardised inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParameters {
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// Per-feature means subtracted before weighting
    pub feature_means: Vec<f64>,
    /// Per-feature divisors applied after centring
    pub feature_scales: Vec<f64>,
}

impl LogisticParameters {
    pub fn n_features(&self) -> usize {
        self.weights.len()
    }

    /// Linear score before the sigmoid
    pub fn decision(&self, values: &[f64]) -> f64 {
        self.intercept
            + values
                .iter()
                .zip(&self.weights)
                .zip(self.feature_means.iter().zip(&self.feature_scales))
                .map(|((x, w), (mean, scale))| w * (x - mean) / scale)
                .sum::<f64>()
    }

    /// Fraud probability for one row in schema order
    pub fn probability(&self, values: &[f64]) -> f64 {
        sigmoid(self.decision(values))
    }
}

/// Logistic function, evaluated so neither branch overflows `exp`
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Immutable, versioned model published by training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Columns the model was trained on, in order
    pub schema: FeatureSchema,
    pub parameters: LogisticParameters,
    /// Operating threshold: flag when probability >= threshold
    pub threshold: f64,
    pub risk_tiers: RiskTierCuts,
    /// Statistics frozen from the training partition
    pub dataset_stats: DatasetStats,
    pub objective: ThresholdObjective,
}

impl ModelArtifact {
    /// File name under the model registry
    pub fn file_name(version: u32) -> String {
        format!("model_v{version}.json")
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), InferenceError> {
        let n = self.schema.len();
        let p = &self.parameters;
        if p.weights.len() != n || p.feature_means.len() != n || p.feature_scales.len() != n {
            return Err(InferenceError::InvalidArtifact(format!(
                "v{}: {} schema columns but {} weights, {} means, {} scales",
                self.version,
                n,
                p.weights.len(),
                p.feature_means.len(),
                p.feature_scales.len()
            )));
        }
        if p.feature_scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(InferenceError::InvalidArtifact(format!(
                "v{}: feature scales must be positive",
                self.version
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(InferenceError::InvalidArtifact(format!(
                "v{}: threshold {} outside [0, 1]",
                self.version, self.threshold
            )));
        }
        if self.risk_tiers.medium > self.risk_tiers.high {
            return Err(InferenceError::InvalidArtifact(format!(
                "v{}: medium tier cut above high tier cut",
                self.version
            )));
        }
        Ok(())
    }
}
