//! Batch Feature Transformation

use crate::features::{FeatureComposer, FeatureVector};
use crate::statistics::DatasetStats;
use crate::FeatureError;
use data_validator::{RawTransaction, SchemaValidationError, Transaction, Validator};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};
use velocity_window::{aggregate_partitioned, VelocityAggregator, DEFAULT_WINDOW_SIZE};

/// Batch transformation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Velocity window size in steps
    pub window_size: u32,
    /// Aggregate per account-role key in parallel
    pub parallel: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            parallel: false,
        }
    }
}

/// A record dropped from the batch
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    /// Identifier, when the record carried one
    pub transaction_id: Option<String>,
    pub error: SchemaValidationError,
}

/// Result of transforming an ordered batch
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    /// Accepted transactions, aligned with `vectors`
    pub transactions: Vec<Transaction>,
    pub vectors: Vec<FeatureVector>,
    pub skipped: Vec<SkippedRecord>,
}

/// Runs validation, velocity aggregation and composition over a batch
#[derive(Debug, Clone, Default)]
pub struct FeatureTransformer {
    config: TransformConfig,
    validator: Validator,
    composer: FeatureComposer,
}

impl FeatureTransformer {
    pub fn new(config: TransformConfig, validator: Validator) -> Self {
        Self {
            config,
            composer: FeatureComposer::new(validator.clone()),
            validator,
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn composer(&self) -> &FeatureComposer {
        &self.composer
    }

    /// Parse raw records, keeping input order and collecting rejects.
    ///
    /// The first record with a given id wins; later repeats are rejected.
    pub fn validate_raw(&self, records: &[RawTransaction]) -> (Vec<Transaction>, Vec<SkippedRecord>) {
        let mut accepted = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            let validated = self
                .validator
                .validate(record)
                .and_then(|tx| first_sighting(&mut seen, tx));
            match validated {
                Ok(tx) => accepted.push(tx),
                Err(error) => {
                    warn!(
                        transaction_id = record.transaction_id.as_deref().unwrap_or("<none>"),
                        field = error.field(),
                        %error,
                        "Skipping invalid record"
                    );
                    skipped.push(SkippedRecord {
                        transaction_id: record.transaction_id.clone(),
                        error,
                    });
                }
            }
        }
        (accepted, skipped)
    }

    /// Compose feature vectors for an ordered batch.
    ///
    /// Semantically invalid transactions are skipped before aggregation so they
    /// never enter any velocity window. A step-order violation fails the batch.
    pub fn transform(
        &self,
        txs: &[Transaction],
        stats: &DatasetStats,
    ) -> Result<TransformOutput, FeatureError> {
        let mut output = TransformOutput::default();
        let mut seen = HashSet::with_capacity(txs.len());
        for tx in txs {
            let checked = self
                .validator
                .check_semantics(tx)
                .and_then(|()| first_sighting(&mut seen, tx.clone()));
            match checked {
                Ok(tx) => output.transactions.push(tx),
                Err(error) => {
                    warn!(transaction_id = %tx.transaction_id, %error, "Skipping invalid transaction");
                    output.skipped.push(SkippedRecord {
                        transaction_id: Some(tx.transaction_id.clone()),
                        error,
                    });
                }
            }
        }

        let velocity = if self.config.parallel {
            aggregate_partitioned(&output.transactions, self.config.window_size)?
        } else {
            VelocityAggregator::new(self.config.window_size).advance_all(&output.transactions)?
        };

        output.vectors = output
            .transactions
            .iter()
            .zip(&velocity)
            .map(|(tx, v)| self.composer.compose(tx, v, stats))
            .collect::<Result<_, _>>()?;

        info!(
            rows = output.vectors.len(),
            skipped = output.skipped.len(),
            window_size = self.config.window_size,
            parallel = self.config.parallel,
            "Feature transformation complete"
        );
        Ok(output)
    }
}

/// Pass `tx` through unless its id was already recorded in `seen`
fn first_sighting(seen: &mut HashSet<String>, tx: Transaction) -> Result<Transaction, SchemaValidationError> {
    if seen.insert(tx.transaction_id.clone()) {
        Ok(tx)
    } else {
        Err(SchemaValidationError::DuplicateId(tx.transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NormalizationMethod;
    use data_validator::TransactionType;

    fn txn(id: &str, step: u32, orig: &str, amount: f64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            step,
            txn_type: TransactionType::Payment,
            amount,
            name_orig: orig.to_string(),
            oldbalance_orig: 1000.0,
            newbalance_orig: 1000.0 - amount,
            name_dest: format!("M{id}"),
            oldbalance_dest: 0.0,
            newbalance_dest: 0.0,
            is_fraud: Some(false),
            is_flagged_fraud: None,
        }
    }

    fn stats() -> DatasetStats {
        DatasetStats::fit(&[100.0, 50.0, 200.0], NormalizationMethod::ZScore).unwrap()
    }

    #[test]
    fn test_invalid_records_never_reach_windows() {
        let mut bad = txn("t2", 1, "A1", 10.0);
        bad.amount = -10.0;
        let txs = vec![txn("t1", 1, "A1", 100.0), bad, txn("t3", 2, "A1", 50.0)];

        let out = FeatureTransformer::default().transform(&txs, &stats()).unwrap();
        assert_eq!(out.vectors.len(), 2);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].transaction_id.as_deref(), Some("t2"));
        assert_eq!(out.vectors[1].get("orig_txn_count_1h"), Some(1.0));
        assert_eq!(out.vectors[1].get("orig_txn_amt_1h"), Some(100.0));
    }

    #[test]
    fn test_origin_scenario_through_batch() {
        let txs = vec![
            txn("t1", 1, "A1", 100.0),
            txn("t2", 2, "A1", 50.0),
            txn("t3", 3, "A1", 200.0),
        ];
        let out = FeatureTransformer::default().transform(&txs, &stats()).unwrap();
        let seen: Vec<(f64, f64)> = out
            .vectors
            .iter()
            .map(|v| {
                (
                    v.get("orig_txn_count_1h").unwrap(),
                    v.get("orig_txn_amt_1h").unwrap(),
                )
            })
            .collect();
        assert_eq!(seen, vec![(0.0, 0.0), (1.0, 100.0), (1.0, 50.0)]);
    }

    #[test]
    fn test_ordering_error_is_fatal() {
        let txs = vec![txn("t1", 4, "A1", 1.0), txn("t2", 3, "A1", 1.0)];
        let err = FeatureTransformer::default().transform(&txs, &stats()).unwrap_err();
        assert!(matches!(err, FeatureError::Ordering(_)));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let txs: Vec<Transaction> = (0..40)
            .map(|i| txn(&format!("t{i}"), i / 3, &format!("A{}", i % 4), 10.0 + i as f64))
            .collect();
        let sequential = FeatureTransformer::default().transform(&txs, &stats()).unwrap();
        let parallel = FeatureTransformer::new(
            TransformConfig {
                window_size: 2,
                parallel: true,
            },
            Validator::default(),
        );
        let parallel_seq = FeatureTransformer::new(
            TransformConfig {
                window_size: 2,
                parallel: false,
            },
            Validator::default(),
        );

        assert_eq!(sequential.vectors.len(), 40);
        assert_eq!(
            parallel.transform(&txs, &stats()).unwrap().vectors,
            parallel_seq.transform(&txs, &stats()).unwrap().vectors
        );
    }

    #[test]
    fn test_validate_raw_collects_rejects() {
        let good = RawTransaction::from(&txn("t1", 1, "A1", 10.0));
        let mut bad = good.clone();
        bad.transaction_id = Some("t2".to_string());
        bad.txn_type = Some("WIRE".to_string());

        let (accepted, skipped) = FeatureTransformer::default().validate_raw(&[good, bad]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].error, SchemaValidationError::UnknownType("WIRE".to_string()));
    }

    #[test]
    fn test_duplicate_ids_are_skipped() {
        let first = RawTransaction::from(&txn("T49", 1, "A1", 10.0));
        let repeat = RawTransaction::from(&txn("T49", 2, "A2", 99.0));
        let other = RawTransaction::from(&txn("T50", 2, "A1", 5.0));

        let transformer = FeatureTransformer::default();
        let (accepted, skipped) = transformer.validate_raw(&[first, repeat, other]);
        assert_eq!(
            accepted.iter().map(|t| t.transaction_id.as_str()).collect::<Vec<_>>(),
            vec!["T49", "T50"]
        );
        assert_eq!(accepted[0].amount, 10.0);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].error, SchemaValidationError::DuplicateId("T49".to_string()));
        assert_eq!(skipped[0].error.field(), "transaction_id");

        // Already-typed batches get the same treatment
        let txs = vec![txn("t1", 1, "A1", 10.0), txn("t1", 1, "A1", 20.0)];
        let out = transformer.transform(&txs, &stats()).unwrap();
        assert_eq!(out.vectors.len(), 1);
        assert_eq!(out.skipped[0].transaction_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_batch_transform_is_byte_deterministic() {
        let txs: Vec<Transaction> = (0..30)
            .map(|i| txn(&format!("t{i}"), i / 4, &format!("A{}", i % 3), 5.0 + i as f64))
            .collect();
        let transformer = FeatureTransformer::new(
            TransformConfig {
                window_size: 2,
                parallel: false,
            },
            Validator::default(),
        );

        let encode = |out: TransformOutput| -> Vec<Vec<u8>> {
            out.vectors
                .iter()
                .map(|v| postcard::to_allocvec(v).unwrap())
                .collect()
        };
        let first = encode(transformer.transform(&txs, &stats()).unwrap());
        let second = encode(transformer.transform(&txs, &stats()).unwrap());
        assert_eq!(first.len(), 30);
        assert_eq!(first, second);
    }
}
