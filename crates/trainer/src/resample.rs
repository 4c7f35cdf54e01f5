//! Training-Partition Resampling

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Class rebalancing applied to the training partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    #[default]
    None,
    /// Drop majority rows
    Undersample,
    /// Duplicate minority rows with replacement
    Oversample,
    /// Oversample halfway, then undersample the rest of the gap
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    pub strategy: ResamplingStrategy,
    /// Desired minority:majority ratio after resampling
    pub target_ratio: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            strategy: ResamplingStrategy::None,
            target_ratio: 1.0,
        }
    }
}

/// Rebalance a set of training indices.
///
/// Only the given indices are ever returned, possibly repeated or dropped.
/// The output is sorted so the fit does not depend on sampling order.
pub fn resample(
    train_indices: &[usize],
    labels: &[bool],
    config: &ResampleConfig,
    rng: &mut StdRng,
) -> Vec<usize> {
    let (fraud, legit): (Vec<usize>, Vec<usize>) =
        train_indices.iter().copied().partition(|&i| labels[i]);
    let (minority, majority) = if fraud.len() <= legit.len() {
        (fraud, legit)
    } else {
        (legit, fraud)
    };

    let ratio = config.target_ratio;
    if config.strategy == ResamplingStrategy::None
        || minority.is_empty()
        || !ratio.is_finite()
        || ratio <= 0.0
    {
        return train_indices.to_vec();
    }

    let desired_minority = ((majority.len() as f64) * ratio).round() as usize;
    let (minority_target, majority_target) = match config.strategy {
        ResamplingStrategy::None => (minority.len(), majority.len()),
        ResamplingStrategy::Undersample => {
            let keep = ((minority.len() as f64) / ratio).ceil() as usize;
            (minority.len(), keep.min(majority.len()))
        }
        ResamplingStrategy::Oversample => (desired_minority.max(minority.len()), majority.len()),
        ResamplingStrategy::Combined => {
            let halfway = (minority.len() + desired_minority.max(minority.len())) / 2;
            let keep = ((halfway as f64) / ratio).ceil() as usize;
            (halfway, keep.min(majority.len()))
        }
    };

    let mut out: Vec<usize> = majority
        .choose_multiple(rng, majority_target)
        .copied()
        .collect();
    out.extend_from_slice(&minority);
    for _ in minority.len()..minority_target {
        out.push(minority[rng.gen_range(0..minority.len())]);
    }
    out.sort_unstable();

    debug!(
        strategy = ?config.strategy,
        before = train_indices.len(),
        after = out.len(),
        minority = minority_target,
        majority = majority_target,
        "Training partition resampled"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn setup() -> (Vec<bool>, Vec<usize>) {
        // 90 legit, 10 fraud, train is the first 80 rows
        let labels: Vec<bool> = (0..100).map(|i| i % 10 == 0).collect();
        (labels, (0..80).collect())
    }

    fn classes(indices: &[usize], labels: &[bool]) -> (usize, usize) {
        let fraud = indices.iter().filter(|&&i| labels[i]).count();
        (fraud, indices.len() - fraud)
    }

    fn run(strategy: ResamplingStrategy, ratio: f64) -> Vec<usize> {
        let (labels, train) = setup();
        let config = ResampleConfig {
            strategy,
            target_ratio: ratio,
        };
        resample(&train, &labels, &config, &mut StdRng::seed_from_u64(42))
    }

    #[test]
    fn test_none_is_identity() {
        let (_, train) = setup();
        assert_eq!(run(ResamplingStrategy::None, 1.0), train);
    }

    #[test]
    fn test_undersample() {
        let (labels, _) = setup();
        let out = run(ResamplingStrategy::Undersample, 0.5);
        assert_eq!(classes(&out, &labels), (8, 16));
    }

    #[test]
    fn test_oversample() {
        let (labels, _) = setup();
        let out = run(ResamplingStrategy::Oversample, 1.0);
        assert_eq!(classes(&out, &labels), (72, 72));
    }

    #[test]
    fn test_combined() {
        let (labels, _) = setup();
        let out = run(ResamplingStrategy::Combined, 1.0);
        assert_eq!(classes(&out, &labels), (40, 40));
    }

    #[test]
    fn test_never_leaves_training_indices() {
        for strategy in [
            ResamplingStrategy::Undersample,
            ResamplingStrategy::Oversample,
            ResamplingStrategy::Combined,
        ] {
            assert!(run(strategy, 0.7).iter().all(|&i| i < 80));
        }
    }
}
