//! Classification Metrics

use crate::split::Partition;
use inference_engine::ThresholdObjective;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confusion matrix for binary classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Tally flags `probability >= threshold` against labels
    pub fn at_threshold(labels: &[bool], probabilities: &[f64], threshold: f64) -> Self {
        let mut cm = Self::default();
        for (&actual, &p) in labels.iter().zip(probabilities) {
            match (actual, p >= threshold) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// Records flagged as fraud
    pub fn flagged(&self) -> usize {
        self.tp + self.fp
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Total misclassification cost
    pub fn cost(&self, false_positive_cost: f64, false_negative_cost: f64) -> f64 {
        self.fp as f64 * false_positive_cost + self.fn_ as f64 * false_negative_cost
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
///
/// `None` when either class is absent.
pub fn roc_auc(labels: &[bool], probabilities: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && probabilities[order[end]] == probabilities[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; a tie group shares its average rank
        let average_rank = (start + 1 + end) as f64 / 2.0;
        positive_rank_sum += average_rank * order[start..end].iter().filter(|&&i| labels[i]).count() as f64;
        start = end;
    }

    let (n_pos, n_neg) = (n_pos as f64, n_neg as f64);
    Some((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Label counts of one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDistribution {
    pub fraud: usize,
    pub legit: usize,
}

impl ClassDistribution {
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a bool>) -> Self {
        labels.into_iter().fold(Self::default(), |mut d, &l| {
            if l {
                d.fraud += 1;
            } else {
                d.legit += 1;
            }
            d
        })
    }

    pub fn total(&self) -> usize {
        self.fraud + self.legit
    }

    pub fn fraud_rate(&self) -> f64 {
        ratio(self.fraud, self.total())
    }
}

/// Held-out evaluation at the chosen threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub confusion_matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: Option<f64>,
    pub fraud_rate: f64,
    /// Mean probability over actual fraud records
    pub avg_probability_fraud: Option<f64>,
    /// Mean probability over actual legitimate records
    pub avg_probability_legit: Option<f64>,
}

impl EvaluationMetrics {
    pub fn evaluate(labels: &[bool], probabilities: &[f64], threshold: f64) -> Self {
        let cm = ConfusionMatrix::at_threshold(labels, probabilities, threshold);
        let mean_where = |class: bool| {
            let values: Vec<f64> = labels
                .iter()
                .zip(probabilities)
                .filter(|(l, _)| **l == class)
                .map(|(_, p)| *p)
                .collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };

        Self {
            confusion_matrix: cm,
            accuracy: cm.accuracy(),
            precision: cm.precision(),
            recall: cm.recall(),
            f1: cm.f1(),
            roc_auc: roc_auc(labels, probabilities),
            fraud_rate: ClassDistribution::from_labels(labels).fraud_rate(),
            avg_probability_fraud: mean_where(true),
            avg_probability_legit: mean_where(false),
        }
    }
}

/// Everything recorded about one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub model_version: u32,
    pub threshold: f64,
    pub objective: ThresholdObjective,
    /// Partition the evaluation was computed on
    pub evaluated_on: Partition,
    pub evaluation: EvaluationMetrics,
    /// Training partition as split
    pub train_distribution: ClassDistribution,
    /// Training rows actually fitted, after resampling
    pub resampled_distribution: ClassDistribution,
    pub validation_distribution: ClassDistribution,
    pub test_distribution: ClassDistribution,
    pub iterations: usize,
    pub final_loss: f64,
}

/// Human-readable performance report
impl fmt::Display for TrainingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = &self.evaluation;
        let cm = &e.confusion_matrix;
        let held_out = cm.total();
        let fraud = cm.tp + cm.fn_;
        let rule = "=".repeat(50);

        writeln!(f, "{rule}")?;
        writeln!(f, "FRAUD DETECTION MODEL PERFORMANCE METRICS (model v{})", self.model_version)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Evaluated on: {} partition", self.evaluated_on)?;
        writeln!(f, "Total Transactions: {held_out}")?;
        writeln!(f, "Fraudulent Transactions: {fraud} ({:.2}%)", e.fraud_rate * 100.0)?;
        writeln!(
            f,
            "Non-Fraudulent Transactions: {} ({:.2}%)",
            held_out - fraud,
            100.0 - e.fraud_rate * 100.0
        )?;
        writeln!(f, "\nModel Performance:")?;
        writeln!(f, "Accuracy:  {:.4}", e.accuracy)?;
        writeln!(f, "Precision: {:.4}", e.precision)?;
        writeln!(f, "Recall:    {:.4}", e.recall)?;
        writeln!(f, "F1 Score:  {:.4}", e.f1)?;
        match e.roc_auc {
            Some(auc) => writeln!(f, "ROC AUC:   {auc:.4}")?,
            None => writeln!(f, "ROC AUC:   n/a (single class held out)")?,
        }
        writeln!(f, "Fraud Threshold: {:.2} ({:?})", self.threshold, self.objective)?;

        writeln!(f, "\nConfidence Levels:")?;
        let fmt_mean = |m: Option<f64>| m.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        writeln!(
            f,
            "Average probability for fraudulent transactions: {}",
            fmt_mean(e.avg_probability_fraud)
        )?;
        writeln!(
            f,
            "Average probability for non-fraudulent transactions: {}",
            fmt_mean(e.avg_probability_legit)
        )?;

        writeln!(f, "\nConfusion Matrix:")?;
        writeln!(f, "              Predicted 0  Predicted 1")?;
        writeln!(f, "Actual 0:     {:>11}  {:>11}", cm.tn, cm.fp)?;
        writeln!(f, "Actual 1:     {:>11}  {:>11}", cm.fn_, cm.tp)?;

        writeln!(f, "\nClass Distribution (fraud/legit):")?;
        for (name, d) in [
            ("train", self.train_distribution),
            ("train (resampled)", self.resampled_distribution),
            ("validation", self.validation_distribution),
            ("test", self.test_distribution),
        ] {
            writeln!(f, "{name:<18} {:>8} / {:<8}", d.fraud, d.legit)?;
        }
        write!(f, "{rule}")
    }
}
