//! Pipeline Configuration
//!
//! Read from an optional TOML file, then overridden by `FRAUD__`-prefixed
//! environment variables (`FRAUD__DATABASE__SOURCE_URL`, ...). Every section
//! has defaults, so an empty environment yields a runnable configuration.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use data_validator::ValidationConfig;
use feature_engine::{NormalizationMethod, TransformConfig};
use inference_engine::{RiskTierCuts, ThresholdObjective};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trainer::{LogisticConfig, ResampleConfig, SplitConfig, TrainerConfig};

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub features: FeaturesConfig,
    pub training: TrainingConfig,
    pub scoring: ScoringConfig,
    pub logging: LoggingConfig,
}

/// SQLite locations of the two stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Raw and feature tables
    pub source_url: String,
    /// Prediction table
    pub prediction_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            source_url: "sqlite://fraud_source.db".to_string(),
            prediction_url: "sqlite://fraud_predictions.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// PaySim-layout CSV consumed by the load step
    pub input_csv: PathBuf,
    /// Model registry directory
    pub model_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_csv: PathBuf::from("data/bank_transactions.csv"),
            model_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Trailing window length in steps
    pub window_size: u32,
    /// Aggregate each account's sequence on its own rayon task
    pub parallel: bool,
    pub normalization: NormalizationMethod,
    pub balance_tolerance: f64,
    pub max_amount: f64,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        let transform = TransformConfig::default();
        let validation = ValidationConfig::default();
        Self {
            window_size: transform.window_size,
            parallel: transform.parallel,
            normalization: NormalizationMethod::default(),
            balance_tolerance: validation.balance_tolerance,
            max_amount: validation.max_amount,
        }
    }
}

impl FeaturesConfig {
    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            window_size: self.window_size,
            parallel: self.parallel,
        }
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            max_amount: self.max_amount,
            balance_tolerance: self.balance_tolerance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub split: SplitConfig,
    pub resample: ResampleConfig,
    pub logistic: LogisticConfig,
    /// Spacing of the threshold sweep grid
    pub threshold_step: f64,
    pub objective: ThresholdObjective,
    /// Seed for resampling
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let trainer = TrainerConfig::default();
        Self {
            split: SplitConfig::default(),
            resample: trainer.resample,
            logistic: trainer.logistic,
            threshold_step: trainer.threshold_step,
            objective: trainer.objective,
            seed: trainer.seed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Tier cuts persisted into newly trained artifacts
    pub risk_tiers: RiskTierCuts,
    /// Score with this registry version instead of the latest one
    pub model_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl PipelineConfig {
    /// Load from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Trainer settings assembled from the training and scoring sections
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            resample: self.training.resample.clone(),
            logistic: self.training.logistic.clone(),
            threshold_step: self.training.threshold_step,
            objective: self.training.objective,
            risk_tiers: self.scoring.risk_tiers,
            seed: self.training.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use trainer::ResamplingStrategy;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.features.window_size, 1);
        assert_eq!(config.features.balance_tolerance, 0.01);
        assert_eq!(config.training.split.seed, 42);
        assert_eq!(config.scoring.risk_tiers, RiskTierCuts { medium: 0.3, high: 0.7 });
        assert!(!config.logging.json());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[database]
source_url = "sqlite://custom.db"

[features]
window_size = 5
normalization = "min_max"

[training.resample]
strategy = "undersample"

[training.objective]
kind = "cost"
false_positive_cost = 1.0
false_negative_cost = 20.0

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database.source_url, "sqlite://custom.db");
        assert_eq!(config.database.prediction_url, "sqlite://fraud_predictions.db");
        assert_eq!(config.features.window_size, 5);
        assert_eq!(config.features.normalization, NormalizationMethod::MinMax);
        assert_eq!(config.training.resample.strategy, ResamplingStrategy::Undersample);
        assert_eq!(config.training.resample.target_ratio, 1.0);
        assert_eq!(
            config.trainer_config().objective,
            ThresholdObjective::Cost {
                false_positive_cost: 1.0,
                false_negative_cost: 20.0
            }
        );
        assert!(config.logging.json());
    }
}
