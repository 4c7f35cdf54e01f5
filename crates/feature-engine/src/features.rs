//! Feature Vector Assembly

use crate::statistics::DatasetStats;
use data_validator::{SchemaValidationError, Transaction, TransactionType, Validator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;
use velocity_window::VelocityFeatures;

/// Column order of the standard feature schema
pub const STANDARD_COLUMNS: [&str; 21] = [
    "amount",
    "oldbalance_orig",
    "newbalance_orig",
    "oldbalance_dest",
    "newbalance_dest",
    "type_cash_in",
    "type_cash_out",
    "type_debit",
    "type_payment",
    "type_transfer",
    "amount_normalized",
    "balance_diff_orig",
    "balance_diff_dest",
    "is_zero_balance_orig",
    "is_zero_balance_dest",
    "orig_balance_mismatch",
    "dest_balance_mismatch",
    "orig_txn_count_1h",
    "dest_txn_count_1h",
    "orig_txn_amt_1h",
    "dest_txn_amt_1h",
];

/// Ordered feature column names, shared between vectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Arc<[String]>,
}

impl FeatureSchema {
    /// Schema produced by [`FeatureComposer`]
    pub fn standard() -> Self {
        Self::new(STANDARD_COLUMNS.iter().map(|c| c.to_string()))
    }

    pub fn new(columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a named column
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Columns present here but absent from `other`
    pub fn missing_from<'a>(&'a self, other: &FeatureSchema) -> Vec<&'a str> {
        self.columns
            .iter()
            .filter(|c| other.index_of(c).is_none())
            .map(String::as_str)
            .collect()
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::standard()
    }
}

/// Feature vector for one transaction, values in schema order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Source transaction
    pub transaction_id: String,
    /// Time step of the source transaction
    pub step: u32,
    /// Column names
    pub schema: FeatureSchema,
    /// Values aligned with `schema`
    pub values: Vec<f64>,
    /// Ground-truth label, when known
    pub is_fraud: Option<bool>,
}

impl FeatureVector {
    /// Value of a named column
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).and_then(|i| self.values.get(i).copied())
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Pure composer of standard-schema feature vectors
#[derive(Debug, Clone, Default)]
pub struct FeatureComposer {
    validator: Validator,
    schema: FeatureSchema,
}

impl FeatureComposer {
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            schema: FeatureSchema::standard(),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Compose the feature vector for `tx`.
    ///
    /// `velocity` must be the aggregator output for this same transaction,
    /// i.e. the window state just before `tx` was observed.
    pub fn compose(
        &self,
        tx: &Transaction,
        velocity: &VelocityFeatures,
        stats: &DatasetStats,
    ) -> Result<FeatureVector, SchemaValidationError> {
        self.validator.check_semantics(tx)?;
        let balance = self.validator.balance_consistency(tx);

        let mut values = Vec::with_capacity(self.schema.len());
        values.extend_from_slice(&[
            tx.amount,
            tx.oldbalance_orig,
            tx.newbalance_orig,
            tx.oldbalance_dest,
            tx.newbalance_dest,
        ]);
        values.extend(TransactionType::ALL.iter().map(|t| flag(*t == tx.txn_type)));
        values.extend_from_slice(&[
            stats.normalize(tx.amount),
            tx.oldbalance_orig - tx.newbalance_orig,
            tx.newbalance_dest - tx.oldbalance_dest,
            flag(tx.oldbalance_orig == 0.0),
            flag(tx.oldbalance_dest == 0.0),
            flag(!balance.origin_consistent),
            flag(!balance.destination_consistent),
            f64::from(velocity.orig_count),
            f64::from(velocity.dest_count),
            velocity.orig_amount,
            velocity.dest_amount,
        ]);
        debug_assert_eq!(values.len(), self.schema.len());

        trace!(transaction_id = %tx.transaction_id, "Feature vector composed");
        Ok(FeatureVector {
            transaction_id: tx.transaction_id.clone(),
            step: tx.step,
            schema: self.schema.clone(),
            values,
            is_fraud: tx.is_fraud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NormalizationMethod;

    fn transfer() -> Transaction {
        Transaction {
            transaction_id: "TXN00000001".to_string(),
            step: 1,
            txn_type: TransactionType::Transfer,
            amount: 181.0,
            name_orig: "C1305486145".to_string(),
            oldbalance_orig: 181.0,
            newbalance_orig: 0.0,
            name_dest: "C553264065".to_string(),
            oldbalance_dest: 0.0,
            newbalance_dest: 0.0,
            is_fraud: Some(true),
            is_flagged_fraud: Some(false),
        }
    }

    fn stats() -> DatasetStats {
        DatasetStats::fit(&[81.0, 281.0], NormalizationMethod::ZScore).unwrap()
    }

    #[test]
    fn test_standard_schema_layout() {
        let schema = FeatureSchema::standard();
        assert_eq!(schema.len(), 21);
        assert_eq!(schema.index_of("amount"), Some(0));
        assert_eq!(schema.index_of("dest_txn_amt_1h"), Some(20));
    }

    #[test]
    fn test_compose_values() {
        let velocity = VelocityFeatures {
            orig_count: 2,
            orig_amount: 300.0,
            dest_count: 0,
            dest_amount: 0.0,
        };
        let v = FeatureComposer::default()
            .compose(&transfer(), &velocity, &stats())
            .unwrap();

        assert_eq!(v.values.len(), v.schema.len());
        assert_eq!(v.get("type_transfer"), Some(1.0));
        assert_eq!(v.get("type_payment"), Some(0.0));
        assert_eq!(v.get("amount_normalized"), Some(0.0));
        assert_eq!(v.get("balance_diff_orig"), Some(181.0));
        assert_eq!(v.get("balance_diff_dest"), Some(0.0));
        assert_eq!(v.get("is_zero_balance_orig"), Some(0.0));
        assert_eq!(v.get("is_zero_balance_dest"), Some(1.0));
        assert_eq!(v.get("orig_txn_count_1h"), Some(2.0));
        assert_eq!(v.get("orig_txn_amt_1h"), Some(300.0));
        assert_eq!(v.is_fraud, Some(true));
    }

    #[test]
    fn test_balance_mismatch_flags() {
        let v = FeatureComposer::default()
            .compose(&transfer(), &VelocityFeatures::default(), &stats())
            .unwrap();
        // Destination never received the 181.0
        assert_eq!(v.get("orig_balance_mismatch"), Some(0.0));
        assert_eq!(v.get("dest_balance_mismatch"), Some(1.0));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let composer = FeatureComposer::default();
        let mut tx = transfer();
        tx.amount = -1.0;
        assert!(composer.compose(&tx, &VelocityFeatures::default(), &stats()).is_err());

        let mut tx = transfer();
        tx.name_orig.clear();
        assert_eq!(
            composer
                .compose(&tx, &VelocityFeatures::default(), &stats())
                .unwrap_err(),
            SchemaValidationError::MissingField { field: "name_orig" }
        );

        let mut tx = transfer();
        tx.oldbalance_dest = f64::NAN;
        assert!(composer.compose(&tx, &VelocityFeatures::default(), &stats()).is_err());
    }

    #[test]
    fn test_compose_is_deterministic() {
        let composer = FeatureComposer::default();
        let velocity = VelocityFeatures {
            orig_count: 1,
            orig_amount: 12.5,
            dest_count: 3,
            dest_amount: 99.0,
        };
        let a = composer.compose(&transfer(), &velocity, &stats()).unwrap();
        let b = composer.compose(&transfer(), &velocity, &stats()).unwrap();

        let bytes_a = postcard::to_allocvec(&a).unwrap();
        let bytes_b = postcard::to_allocvec(&b).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn test_schema_diff() {
        let full = FeatureSchema::new(["f1", "f2", "f3"].map(String::from));
        let short = FeatureSchema::new(["f1", "f2"].map(String::from));
        assert_ne!(full, short);
        assert_eq!(full.missing_from(&short), vec!["f3"]);
        assert!(short.missing_from(&full).is_empty());
    }
}
