//! Dataset Statistics

use crate::FeatureError;
use serde::{Deserialize, Serialize};

/// Smallest spread treated as non-degenerate
const MIN_SPREAD: f64 = 1e-12;

/// Summary statistics for a set of values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// Mean value
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Number of values
    pub count: usize,
}

impl SummaryStatistics {
    /// Compute summary statistics from a slice of values
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let max = values.iter().cloned().fold(f64::MIN, f64::max);

        let m2: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        let std_dev = (m2 / n).sqrt();

        Self {
            mean,
            std_dev,
            min,
            max,
            count: values.len(),
        }
    }
}

/// How `amount_normalized` is derived from the frozen statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    /// (x - mean) / std_dev
    #[default]
    ZScore,
    /// (x - min) / (max - min)
    MinMax,
}

/// Amount statistics fitted once on the training partition, then frozen.
///
/// There is no way to refit or mutate an instance: inference must reuse the
/// exact statistics the model was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    method: NormalizationMethod,
    amount: SummaryStatistics,
}

impl DatasetStats {
    /// Fit from training-partition amounts only
    pub fn fit(training_amounts: &[f64], method: NormalizationMethod) -> Result<Self, FeatureError> {
        if training_amounts.is_empty() {
            return Err(FeatureError::EmptyTrainingPartition);
        }
        Ok(Self {
            method,
            amount: SummaryStatistics::compute(training_amounts),
        })
    }

    /// Rescale an amount with the frozen statistics
    pub fn normalize(&self, amount: f64) -> f64 {
        match self.method {
            NormalizationMethod::ZScore => {
                let std_dev = if self.amount.std_dev > MIN_SPREAD {
                    self.amount.std_dev
                } else {
                    1.0
                };
                (amount - self.amount.mean) / std_dev
            }
            NormalizationMethod::MinMax => {
                let range = self.amount.max - self.amount.min;
                let range = if range > MIN_SPREAD { range } else { 1.0 };
                (amount - self.amount.min) / range
            }
        }
    }

    pub fn method(&self) -> NormalizationMethod {
        self.method
    }

    /// Frozen amount statistics
    pub fn amount(&self) -> &SummaryStatistics {
        &self.amount
    }

    /// Number of training rows the statistics were fitted on
    pub fn sample_count(&self) -> usize {
        self.amount.count
    }
}
