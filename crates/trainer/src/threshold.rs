//! Operating Threshold Selection

use crate::metrics::ConfusionMatrix;
use crate::TrainError;
use inference_engine::ThresholdObjective;
use tracing::debug;

/// Winning threshold and its objective value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdChoice {
    pub threshold: f64,
    /// F1 (higher is better) or total cost (lower is better)
    pub score: f64,
}

/// Candidate thresholds `step, 2*step, ...` strictly inside (0, 1)
pub fn candidates(step: f64) -> Result<Vec<f64>, TrainError> {
    if !(step > 0.0 && step < 0.5) {
        return Err(TrainError::Shape(format!("threshold step {step} must be in (0, 0.5)")));
    }
    let n = (1.0 / step).round() as usize;
    Ok((1..n)
        .map(|k| ((k as f64 * step) * 1e9).round() / 1e9)
        .filter(|t| *t < 1.0)
        .collect())
}

/// Sweep candidate thresholds over held-out probabilities.
///
/// Ties resolve to the lowest threshold.
pub fn sweep(
    labels: &[bool],
    probabilities: &[f64],
    step: f64,
    objective: &ThresholdObjective,
) -> Result<ThresholdChoice, TrainError> {
    if labels.len() != probabilities.len() {
        return Err(TrainError::Shape(format!(
            "{} labels but {} probabilities",
            labels.len(),
            probabilities.len()
        )));
    }

    let mut best: Option<ThresholdChoice> = None;
    for threshold in candidates(step)? {
        let cm = ConfusionMatrix::at_threshold(labels, probabilities, threshold);
        let score = match objective {
            ThresholdObjective::F1 => cm.f1(),
            ThresholdObjective::Cost {
                false_positive_cost,
                false_negative_cost,
            } => cm.cost(*false_positive_cost, *false_negative_cost),
        };
        let better = match (best, objective) {
            (None, _) => true,
            (Some(b), ThresholdObjective::F1) => score > b.score,
            (Some(b), ThresholdObjective::Cost { .. }) => score < b.score,
        };
        if better {
            best = Some(ThresholdChoice { threshold, score });
        }
    }

    let choice = best.ok_or_else(|| TrainError::Shape("no threshold candidates".to_string()))?;
    debug!(threshold = choice.threshold, score = choice.score, ?objective, "Threshold selected");
    Ok(choice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_candidates() {
        let c = candidates(0.01).unwrap();
        assert_eq!(c.len(), 99);
        assert_eq!(c[0], 0.01);
        assert_eq!(c[49], 0.5);
        assert_eq!(c[98], 0.99);
        assert!(candidates(0.0).is_err());
        assert!(candidates(0.7).is_err());
    }

    #[test]
    fn test_f1_picks_separating_threshold() {
        let labels = [false, false, false, true, true];
        let probs = [0.1, 0.2, 0.35, 0.6, 0.8];
        let choice = sweep(&labels, &probs, 0.01, &ThresholdObjective::F1).unwrap();
        // Every threshold in (0.35, 0.6] separates perfectly; the lowest wins
        assert_eq!(choice.threshold, 0.36);
        assert_eq!(choice.score, 1.0);
    }

    #[test]
    fn test_cost_objective_prefers_recall() {
        let labels = [false, false, true, false, true];
        let probs = [0.1, 0.3, 0.4, 0.5, 0.9];
        let expensive_misses = ThresholdObjective::Cost {
            false_positive_cost: 1.0,
            false_negative_cost: 100.0,
        };
        let choice = sweep(&labels, &probs, 0.01, &expensive_misses).unwrap();
        // Catching the 0.4 fraud costs one false positive at most
        assert!(choice.threshold <= 0.4);
        assert_eq!(choice.score, 1.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(sweep(&[true], &[0.5, 0.4], 0.01, &ThresholdObjective::F1).is_err());
    }

    proptest! {
        #[test]
        fn prop_raising_threshold_never_flags_more(
            probs in prop::collection::vec(0.0f64..=1.0, 1..200),
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let labels: Vec<bool> = probs.iter().map(|p| *p > 0.5).collect();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let flagged_low = ConfusionMatrix::at_threshold(&labels, &probs, low).flagged();
            let flagged_high = ConfusionMatrix::at_threshold(&labels, &probs, high).flagged();
            prop_assert!(flagged_high <= flagged_low);
        }
    }
}
