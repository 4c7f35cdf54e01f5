//! Step Implementations Backed by the Stores

use crate::config::PipelineConfig;
use crate::orchestrator::{Artifact, PipelineStep, StageOutcome, StageRunner};
use crate::PipelineError;
use async_trait::async_trait;
use data_validator::{RawTransaction, Validator};
use feature_engine::{DatasetStats, FeatureTransformer};
use inference_engine::Scorer;
use std::collections::HashMap;
use std::path::Path;
use storage::{
    FeatureRecord, FeatureTable, ModelRegistry, PredictionRecord, PredictionStore,
    TransactionStore,
};
use trainer::{stratified_split, Partition, Trainer, TrainingSet};
use tracing::{debug, info};

/// Read a PaySim-layout CSV, giving id-less rows a positional id
fn read_csv(path: &Path) -> Result<Vec<RawTransaction>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<RawTransaction>().enumerate() {
        let mut record = result?;
        if record.transaction_id.as_deref().map_or(true, str::is_empty) {
            record.transaction_id = Some(format!("TXN{:08}", row + 1));
        }
        records.push(record);
    }
    debug!(path = %path.display(), rows = records.len(), "CSV read");
    Ok(records)
}

/// The four pipeline steps wired to SQLite and the model registry
pub struct PipelineStages {
    config: PipelineConfig,
    source: TransactionStore,
    predictions: PredictionStore,
    registry: ModelRegistry,
}

impl PipelineStages {
    /// Connect both databases and open the registry
    pub async fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        let source = TransactionStore::new(storage::connect(&config.database.source_url).await?).await?;
        let predictions =
            PredictionStore::new(storage::connect(&config.database.prediction_url).await?).await?;
        let registry = ModelRegistry::open(&config.paths.model_dir)?;
        Ok(Self {
            config,
            source,
            predictions,
            registry,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn source(&self) -> &TransactionStore {
        &self.source
    }

    pub fn predictions(&self) -> &PredictionStore {
        &self.predictions
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    async fn load(&self) -> Result<StageOutcome, PipelineError> {
        let records = read_csv(&self.config.paths.input_csv)?;
        let rows = self.source.replace_raw(&records).await?;
        Ok(StageOutcome {
            rows_processed: rows,
            rows_skipped: 0,
        })
    }

    async fn transform(&self) -> Result<StageOutcome, PipelineError> {
        let features = &self.config.features;
        let transformer = FeatureTransformer::new(
            features.transform_config(),
            Validator::new(features.validation_config()),
        );

        let raw = self.source.load_raw().await?;
        let (transactions, rejected) = transformer.validate_raw(&raw);

        // Only labelled rows take part in the split; statistics come from train
        let (labelled_ids, labels): (Vec<&str>, Vec<bool>) = transactions
            .iter()
            .filter_map(|tx| tx.is_fraud.map(|label| (tx.transaction_id.as_str(), label)))
            .unzip();
        let split = stratified_split(&labels, &self.config.training.split)?;
        let partitions: HashMap<&str, Partition> = labelled_ids.into_iter().zip(split).collect();

        let train_amounts: Vec<f64> = transactions
            .iter()
            .filter(|tx| partitions.get(tx.transaction_id.as_str()) == Some(&Partition::Train))
            .map(|tx| tx.amount)
            .collect();
        let stats = DatasetStats::fit(&train_amounts, features.normalization)?;
        info!(
            train_rows = stats.sample_count(),
            labelled = labels.len(),
            "Dataset statistics frozen from the training partition"
        );

        let output = transformer.transform(&transactions, &stats)?;
        let records = output
            .transactions
            .iter()
            .zip(output.vectors)
            .map(|(tx, vector)| FeatureRecord {
                partition: partitions.get(tx.transaction_id.as_str()).copied(),
                vector,
                txn_type: tx.txn_type,
                name_orig: tx.name_orig.clone(),
                name_dest: tx.name_dest.clone(),
                is_flagged_fraud: tx.is_flagged_fraud,
            })
            .collect();
        let table = FeatureTable {
            schema: transformer.composer().schema().clone(),
            stats,
            records,
        };
        let rows = self.source.replace_features(&table).await?;

        Ok(StageOutcome {
            rows_processed: rows,
            rows_skipped: (rejected.len() + output.skipped.len()) as u64,
        })
    }

    async fn train(&self) -> Result<StageOutcome, PipelineError> {
        let table = self.source.load_features().await?;
        let total = table.records.len();
        let (vectors, partitions): (Vec<_>, Vec<_>) = table
            .records
            .into_iter()
            .filter_map(|r| r.partition.map(|p| (r.vector, p)))
            .unzip();
        let set = TrainingSet::new(vectors, partitions, table.stats)?;

        let version = self.registry.next_version()?;
        let (artifact, metrics) = Trainer::new(self.config.trainer_config()).train(&set, version)?;
        self.registry.publish(&artifact, &metrics)?;

        info!(
            version,
            threshold = artifact.threshold,
            f1 = metrics.evaluation.f1,
            roc_auc = metrics.evaluation.roc_auc,
            "Model trained"
        );
        Ok(StageOutcome {
            rows_processed: set.len() as u64,
            rows_skipped: (total - set.len()) as u64,
        })
    }

    async fn predict(&self) -> Result<StageOutcome, PipelineError> {
        let artifact = match self.config.scoring.model_version {
            Some(version) => self.registry.load(version)?,
            None => self.registry.load_latest()?,
        };
        let scorer = Scorer::new(artifact)?;
        let table = self.source.load_features().await?;
        scorer.check_dataset_stats(&table.stats)?;

        let mut records = Vec::with_capacity(table.records.len());
        for r in &table.records {
            let amount = r
                .vector
                .get("amount")
                .ok_or(PipelineError::MissingColumn("amount"))?;
            records.push(PredictionRecord {
                prediction: scorer.predict(&r.vector)?,
                step: r.vector.step,
                txn_type: r.txn_type,
                amount,
                name_orig: r.name_orig.clone(),
                name_dest: r.name_dest.clone(),
                actual_fraud: r.vector.is_fraud,
            });
        }
        let rows = self.predictions.replace(&records).await?;

        info!(
            model_version = scorer.model_version(),
            rows,
            flagged = records.iter().filter(|r| r.prediction.is_fraud).count(),
            "Transactions scored"
        );
        Ok(StageOutcome {
            rows_processed: rows,
            rows_skipped: 0,
        })
    }
}

#[async_trait]
impl StageRunner for PipelineStages {
    async fn artifact_rows(&self, artifact: Artifact) -> Result<u64, PipelineError> {
        let rows = match artifact {
            Artifact::RawTransactions => self.source.raw_count().await?,
            Artifact::FeatureTable => self.source.feature_count().await?,
            Artifact::ModelArtifact => {
                let versions = self.registry.versions()?;
                match self.config.scoring.model_version {
                    Some(v) => u64::from(versions.contains(&v)),
                    None => versions.len() as u64,
                }
            }
            Artifact::Predictions => self.predictions.count().await?,
        };
        Ok(rows)
    }

    async fn execute(&self, step: PipelineStep) -> Result<StageOutcome, PipelineError> {
        match step {
            PipelineStep::Load => self.load().await,
            PipelineStep::Transform => self.transform().await,
            PipelineStep::Train => self.train().await,
            PipelineStep::Predict => self.predict().await,
        }
    }
}
