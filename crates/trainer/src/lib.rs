//! Imbalance-Aware Trainer
//!
//! Fits a logistic regression on the training partition of a feature table,
//! rebalancing classes only inside that partition, then picks the operating
//! threshold on the validation partition and evaluates on the test partition.

mod logistic;
mod metrics;
mod resample;
mod split;
mod threshold;

pub use logistic::{LogisticConfig, LogisticFit, Standardizer};
pub use metrics::{roc_auc, ClassDistribution, ConfusionMatrix, EvaluationMetrics, TrainingMetrics};
pub use resample::{resample, ResampleConfig, ResamplingStrategy};
pub use split::{stratified_split, Partition, SplitConfig};
pub use threshold::{candidates, sweep, ThresholdChoice};

use chrono::Utc;
use feature_engine::{DatasetStats, FeatureSchema, FeatureVector};
use inference_engine::{LogisticParameters, ModelArtifact, RiskTierCuts, ThresholdObjective};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors during training
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("The {0} partition is empty")]
    EmptyPartition(Partition),

    #[error("Training partition holds a single class ({fraud} fraud, {legit} legit)")]
    SingleClass { fraud: usize, legit: usize },

    /// The threshold sweep needs both classes to score candidates
    #[error("Validation partition holds a single class ({fraud} fraud, {legit} legit)")]
    DegenerateValidation { fraud: usize, legit: usize },

    #[error("Shape error: {0}")]
    Shape(String),

    /// Held-out class distribution changed during training
    #[error("Partition leak in {partition}: {before:?} before training, {after:?} after")]
    PartitionLeak {
        partition: Partition,
        before: ClassDistribution,
        after: ClassDistribution,
    },

    #[error("Gradient descent diverged after {iterations} iterations")]
    Diverged { iterations: usize },
}

/// Training settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub resample: ResampleConfig,
    pub logistic: LogisticConfig,
    /// Threshold sweep increment
    pub threshold_step: f64,
    pub objective: ThresholdObjective,
    pub risk_tiers: RiskTierCuts,
    /// Seed for resampling
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            resample: ResampleConfig::default(),
            logistic: LogisticConfig::default(),
            threshold_step: 0.01,
            objective: ThresholdObjective::F1,
            risk_tiers: RiskTierCuts::default(),
            seed: 42,
        }
    }
}

/// Labelled feature table with its fixed partitions
#[derive(Debug, Clone)]
pub struct TrainingSet {
    schema: FeatureSchema,
    vectors: Vec<FeatureVector>,
    labels: Vec<bool>,
    partitions: Vec<Partition>,
    dataset_stats: DatasetStats,
}

impl TrainingSet {
    /// Build from a feature table. Unlabelled rows are dropped.
    pub fn new(
        vectors: Vec<FeatureVector>,
        partitions: Vec<Partition>,
        dataset_stats: DatasetStats,
    ) -> Result<Self, TrainError> {
        if vectors.len() != partitions.len() {
            return Err(TrainError::Shape(format!(
                "{} vectors but {} partition assignments",
                vectors.len(),
                partitions.len()
            )));
        }
        let schema = match vectors.first() {
            Some(v) => v.schema.clone(),
            None => return Err(TrainError::EmptyPartition(Partition::Train)),
        };

        let total = vectors.len();
        let mut set = Self {
            schema,
            vectors: Vec::with_capacity(total),
            labels: Vec::with_capacity(total),
            partitions: Vec::with_capacity(total),
            dataset_stats,
        };
        for (vector, partition) in vectors.into_iter().zip(partitions) {
            if vector.schema != set.schema || vector.values.len() != set.schema.len() {
                return Err(TrainError::Shape(format!(
                    "transaction {} does not match the table schema",
                    vector.transaction_id
                )));
            }
            if let Some(label) = vector.is_fraud {
                set.labels.push(label);
                set.partitions.push(partition);
                set.vectors.push(vector);
            }
        }
        if set.vectors.len() < total {
            warn!(dropped = total - set.vectors.len(), "Unlabelled rows excluded from training");
        }
        Ok(set)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn dataset_stats(&self) -> &DatasetStats {
        &self.dataset_stats
    }

    /// Row indices of one partition
    pub fn indices(&self, partition: Partition) -> Vec<usize> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == partition)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn distribution(&self, partition: Partition) -> ClassDistribution {
        ClassDistribution::from_labels(
            self.partitions
                .iter()
                .zip(&self.labels)
                .filter(|(p, _)| **p == partition)
                .map(|(_, l)| l),
        )
    }

    fn matrix(&self, rows: &[usize]) -> Array2<f64> {
        let d = self.schema.len();
        Array2::from_shape_fn((rows.len(), d), |(r, c)| self.vectors[rows[r]].values[c])
    }
}

/// Held-out distributions must be identical before and after training
fn check_held_out(
    before: &[(Partition, ClassDistribution)],
    set: &TrainingSet,
) -> Result<(), TrainError> {
    for &(partition, before) in before {
        let after = set.distribution(partition);
        if after != before {
            return Err(TrainError::PartitionLeak {
                partition,
                before,
                after,
            });
        }
    }
    Ok(())
}

/// Imbalance-aware logistic regression trainer
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train one model version
    pub fn train(
        &self,
        set: &TrainingSet,
        version: u32,
    ) -> Result<(ModelArtifact, TrainingMetrics), TrainError> {
        let train_idx = set.indices(Partition::Train);
        if train_idx.is_empty() {
            return Err(TrainError::EmptyPartition(Partition::Train));
        }
        let train_distribution = set.distribution(Partition::Train);
        if train_distribution.fraud == 0 || train_distribution.legit == 0 {
            return Err(TrainError::SingleClass {
                fraud: train_distribution.fraud,
                legit: train_distribution.legit,
            });
        }
        let validation_idx = set.indices(Partition::Validation);
        if validation_idx.is_empty() {
            return Err(TrainError::EmptyPartition(Partition::Validation));
        }
        let validation_distribution = set.distribution(Partition::Validation);
        if validation_distribution.fraud == 0 || validation_distribution.legit == 0 {
            return Err(TrainError::DegenerateValidation {
                fraud: validation_distribution.fraud,
                legit: validation_distribution.legit,
            });
        }
        let held_out = [
            (Partition::Validation, validation_distribution),
            (Partition::Test, set.distribution(Partition::Test)),
        ];

        info!(
            version,
            train = train_idx.len(),
            validation = validation_idx.len(),
            fraud = train_distribution.fraud,
            strategy = ?self.config.resample.strategy,
            "Training model"
        );

        // Scaling is fitted on the split as-is, before any resampling
        let standardizer = Standardizer::fit(&set.matrix(&train_idx))?;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let fit_idx = resample(&train_idx, &set.labels, &self.config.resample, &mut rng);
        if let Some(&stray) = fit_idx.iter().find(|&&i| set.partitions[i] != Partition::Train) {
            let partition = set.partitions[stray];
            let before = set.distribution(partition);
            return Err(TrainError::PartitionLeak {
                partition,
                before,
                after: ClassDistribution::from_labels(
                    fit_idx
                        .iter()
                        .filter(|&&i| set.partitions[i] == partition)
                        .map(|&i| &set.labels[i]),
                ),
            });
        }
        let resampled_distribution = ClassDistribution::from_labels(fit_idx.iter().map(|&i| &set.labels[i]));

        let x_fit = standardizer.transform(&set.matrix(&fit_idx));
        let y_fit = Array1::from_iter(fit_idx.iter().map(|&i| if set.labels[i] { 1.0 } else { 0.0 }));
        let fitted = logistic::fit(&x_fit, &y_fit, &self.config.logistic)?;

        let probabilities = |rows: &[usize]| -> Vec<f64> {
            let x = standardizer.transform(&set.matrix(rows));
            logistic::predict_proba(&x, &fitted.weights, fitted.intercept).to_vec()
        };
        let labels_of = |rows: &[usize]| -> Vec<bool> { rows.iter().map(|&i| set.labels[i]).collect() };

        let choice = sweep(
            &labels_of(&validation_idx),
            &probabilities(&validation_idx),
            self.config.threshold_step,
            &self.config.objective,
        )?;

        let test_idx = set.indices(Partition::Test);
        let (evaluated_on, eval_idx) = if test_idx.is_empty() {
            warn!("Test partition is empty, evaluating on validation");
            (Partition::Validation, validation_idx)
        } else {
            (Partition::Test, test_idx)
        };
        let evaluation =
            EvaluationMetrics::evaluate(&labels_of(&eval_idx), &probabilities(&eval_idx), choice.threshold);

        check_held_out(&held_out, set)?;

        let artifact = ModelArtifact {
            version,
            created_at: Utc::now(),
            schema: set.schema.clone(),
            parameters: LogisticParameters {
                weights: fitted.weights.to_vec(),
                intercept: fitted.intercept,
                feature_means: standardizer.means.to_vec(),
                feature_scales: standardizer.scales.to_vec(),
            },
            threshold: choice.threshold,
            risk_tiers: self.config.risk_tiers,
            dataset_stats: set.dataset_stats.clone(),
            objective: self.config.objective,
        };
        let metrics = TrainingMetrics {
            model_version: version,
            threshold: choice.threshold,
            objective: self.config.objective,
            evaluated_on,
            evaluation,
            train_distribution,
            resampled_distribution,
            validation_distribution: held_out[0].1,
            test_distribution: held_out[1].1,
            iterations: fitted.iterations,
            final_loss: fitted.final_loss,
        };

        info!(
            version,
            threshold = metrics.threshold,
            f1 = metrics.evaluation.f1,
            precision = metrics.evaluation.precision,
            recall = metrics.evaluation.recall,
            roc_auc = ?metrics.evaluation.roc_auc,
            evaluated_on = %evaluated_on,
            "Model trained"
        );
        Ok((artifact, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_engine::NormalizationMethod;
    use inference_engine::Scorer;

    fn vector(i: usize, fraud: Option<bool>) -> FeatureVector {
        let is_fraud = fraud.unwrap_or(false);
        let x1 = if is_fraud {
            3.0 + (i % 7) as f64 * 0.1
        } else {
            (i % 13) as f64 * 0.1
        };
        FeatureVector {
            transaction_id: format!("TXN{i:08}"),
            step: i as u32,
            schema: FeatureSchema::new(["x1", "x2", "x3"].map(String::from)),
            values: vec![x1, ((i / 10) % 5) as f64, 1.0],
            is_fraud: fraud,
        }
    }

    fn dataset(n: usize) -> (Vec<FeatureVector>, Vec<Partition>) {
        let vectors: Vec<FeatureVector> = (0..n).map(|i| vector(i, Some(i % 10 == 0))).collect();
        let labels: Vec<bool> = vectors.iter().map(|v| v.is_fraud == Some(true)).collect();
        let partitions = stratified_split(&labels, &SplitConfig::default()).unwrap();
        (vectors, partitions)
    }

    fn stats() -> DatasetStats {
        DatasetStats::fit(&[1.0, 2.0, 3.0], NormalizationMethod::ZScore).unwrap()
    }

    #[test]
    fn test_trains_separable_data() {
        let (vectors, partitions) = dataset(300);
        let set = TrainingSet::new(vectors.clone(), partitions, stats()).unwrap();
        let (artifact, metrics) = Trainer::default().train(&set, 1).unwrap();

        assert_eq!(artifact.version, 1);
        assert_eq!(artifact.parameters.weights.len(), 3);
        assert!(artifact.threshold > 0.0 && artifact.threshold < 1.0);
        assert_eq!(metrics.evaluated_on, Partition::Test);
        assert_eq!(metrics.evaluation.recall, 1.0);
        assert!(metrics.evaluation.f1 >= 0.8);
        assert!(metrics.evaluation.roc_auc.unwrap() > 0.95);

        // The published artifact scores the same rows on its own
        let scorer = Scorer::new(artifact).unwrap();
        let fraud = scorer.predict(&vectors[0]).unwrap();
        let legit = scorer.predict(&vectors[1]).unwrap();
        assert!(fraud.is_fraud);
        assert!(!legit.is_fraud);
    }

    #[test]
    fn test_resampling_keeps_held_out_distributions() {
        let (vectors, partitions) = dataset(300);
        let set = TrainingSet::new(vectors, partitions, stats()).unwrap();
        let validation_before = set.distribution(Partition::Validation);
        let test_before = set.distribution(Partition::Test);

        for strategy in [
            ResamplingStrategy::Undersample,
            ResamplingStrategy::Oversample,
            ResamplingStrategy::Combined,
        ] {
            let trainer = Trainer::new(TrainerConfig {
                resample: ResampleConfig {
                    strategy,
                    target_ratio: 1.0,
                },
                ..TrainerConfig::default()
            });
            let (_, metrics) = trainer.train(&set, 2).unwrap();

            assert_eq!(metrics.validation_distribution, validation_before);
            assert_eq!(metrics.test_distribution, test_before);
            assert_eq!(set.distribution(Partition::Validation), validation_before);
            assert_eq!(metrics.resampled_distribution.fraud, metrics.resampled_distribution.legit);
            assert_ne!(metrics.resampled_distribution, metrics.train_distribution);
        }
    }

    #[test]
    fn test_leak_is_detected() {
        let (vectors, partitions) = dataset(100);
        let set = TrainingSet::new(vectors, partitions, stats()).unwrap();
        let wrong = ClassDistribution {
            fraud: 999,
            legit: 0,
        };
        let err = check_held_out(&[(Partition::Validation, wrong)], &set).unwrap_err();
        assert!(matches!(
            err,
            TrainError::PartitionLeak {
                partition: Partition::Validation,
                ..
            }
        ));
    }

    #[test]
    fn test_single_class_rejected() {
        let vectors: Vec<FeatureVector> = (0..50).map(|i| vector(i, Some(false))).collect();
        let partitions = stratified_split(&vec![false; 50], &SplitConfig::default()).unwrap();
        let set = TrainingSet::new(vectors, partitions, stats()).unwrap();
        assert!(matches!(
            Trainer::default().train(&set, 1),
            Err(TrainError::SingleClass { fraud: 0, .. })
        ));
    }

    #[test]
    fn test_validation_without_fraud_rejected() {
        let vectors: Vec<FeatureVector> = (0..300).map(|i| vector(i, Some(i == 0 || i == 10))).collect();
        let labels: Vec<bool> = vectors.iter().map(|v| v.is_fraud == Some(true)).collect();
        let partitions = stratified_split(&labels, &SplitConfig::default()).unwrap();
        let set = TrainingSet::new(vectors, partitions, stats()).unwrap();
        assert_eq!(set.distribution(Partition::Validation).fraud, 0);

        assert!(matches!(
            Trainer::default().train(&set, 1),
            Err(TrainError::DegenerateValidation { fraud: 0, .. })
        ));
    }

    #[test]
    fn test_empty_train_partition() {
        let (vectors, _) = dataset(20);
        let set = TrainingSet::new(vectors, vec![Partition::Test; 20], stats()).unwrap();
        assert!(matches!(
            Trainer::default().train(&set, 1),
            Err(TrainError::EmptyPartition(Partition::Train))
        ));
    }

    #[test]
    fn test_unlabelled_rows_dropped() {
        let mut vectors: Vec<FeatureVector> = (0..10).map(|i| vector(i, Some(i % 2 == 0))).collect();
        vectors.push(vector(10, None));
        let set = TrainingSet::new(vectors, vec![Partition::Train; 11], stats()).unwrap();
        assert_eq!(set.len(), 10);
    }

    #[test]
    fn test_mixed_schema_rejected() {
        let mut vectors: Vec<FeatureVector> = (0..3).map(|i| vector(i, Some(false))).collect();
        vectors[2].schema = FeatureSchema::new(["x1", "x2"].map(String::from));
        vectors[2].values.pop();
        assert!(matches!(
            TrainingSet::new(vectors, vec![Partition::Train; 3], stats()),
            Err(TrainError::Shape(_))
        ));
    }
}
