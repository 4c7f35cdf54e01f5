//! Stratified Partitioning

use crate::TrainError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

/// Dataset partition a labelled record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Validation => "validation",
            Partition::Test => "test",
        }
    }
}

impl FromStr for Partition {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Partition::Train),
            "validation" => Ok(Partition::Validation),
            "test" => Ok(Partition::Test),
            other => Err(TrainError::Shape(format!("unknown partition {other:?}"))),
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split proportions; the test partition takes the remainder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_fraction: f64,
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.6,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Assign every label to a partition, preserving the class ratio in each.
///
/// The same labels and config always produce the same assignment.
pub fn stratified_split(labels: &[bool], config: &SplitConfig) -> Result<Vec<Partition>, TrainError> {
    let fractions_valid = (0.0..=1.0).contains(&config.train_fraction)
        && (0.0..=1.0).contains(&config.validation_fraction)
        && config.train_fraction + config.validation_fraction <= 1.0;
    if !fractions_valid {
        return Err(TrainError::Shape(format!(
            "invalid split fractions train={} validation={}",
            config.train_fraction, config.validation_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut partitions = vec![Partition::Test; labels.len()];

    for class in [false, true] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(&mut rng);

        let n = members.len();
        let n_train = (((n as f64) * config.train_fraction).round() as usize).min(n);
        let n_validation = (((n as f64) * config.validation_fraction).round() as usize).min(n - n_train);

        for (rank, idx) in members.into_iter().enumerate() {
            partitions[idx] = if rank < n_train {
                Partition::Train
            } else if rank < n_train + n_validation {
                Partition::Validation
            } else {
                Partition::Test
            };
        }
    }

    info!(
        rows = labels.len(),
        train = partitions.iter().filter(|p| **p == Partition::Train).count(),
        validation = partitions.iter().filter(|p| **p == Partition::Validation).count(),
        seed = config.seed,
        "Stratified split assigned"
    );
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(legit: usize, fraud: usize) -> Vec<bool> {
        let mut labels = vec![false; legit];
        labels.extend(vec![true; fraud]);
        labels
    }

    fn count(parts: &[Partition], labels: &[bool], partition: Partition, class: bool) -> usize {
        parts
            .iter()
            .zip(labels)
            .filter(|(p, l)| **p == partition && **l == class)
            .count()
    }

    #[test]
    fn test_proportions_per_class() {
        let labels = labels(1000, 50);
        let parts = stratified_split(&labels, &SplitConfig::default()).unwrap();

        assert_eq!(count(&parts, &labels, Partition::Train, false), 600);
        assert_eq!(count(&parts, &labels, Partition::Validation, false), 200);
        assert_eq!(count(&parts, &labels, Partition::Test, false), 200);
        assert_eq!(count(&parts, &labels, Partition::Train, true), 30);
        assert_eq!(count(&parts, &labels, Partition::Validation, true), 10);
        assert_eq!(count(&parts, &labels, Partition::Test, true), 10);
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let labels = labels(200, 20);
        let a = stratified_split(&labels, &SplitConfig::default()).unwrap();
        let b = stratified_split(&labels, &SplitConfig::default()).unwrap();
        assert_eq!(a, b);

        let other = SplitConfig {
            seed: 7,
            ..SplitConfig::default()
        };
        assert_ne!(a, stratified_split(&labels, &other).unwrap());
    }

    #[test]
    fn test_tiny_minority_never_overflows() {
        let labels = labels(10, 1);
        let parts = stratified_split(&labels, &SplitConfig::default()).unwrap();
        assert_eq!(parts.len(), 11);
        assert_eq!(parts.iter().zip(&labels).filter(|(_, l)| **l).count(), 1);
    }

    #[test]
    fn test_invalid_fractions() {
        let config = SplitConfig {
            train_fraction: 0.9,
            validation_fraction: 0.2,
            seed: 1,
        };
        assert!(stratified_split(&[true, false], &config).is_err());
    }

    #[test]
    fn test_partition_text() {
        for p in [Partition::Train, Partition::Validation, Partition::Test] {
            assert_eq!(p.as_str().parse::<Partition>().unwrap(), p);
        }
    }
}
