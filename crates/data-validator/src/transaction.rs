//! Transaction data structures

use crate::error::SchemaValidationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transaction type, as labelled in the source data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    CashIn,
    CashOut,
    Debit,
    Payment,
    Transfer,
}

impl TransactionType {
    /// All types in feature-schema order
    pub const ALL: [TransactionType; 5] = [
        TransactionType::CashIn,
        TransactionType::CashOut,
        TransactionType::Debit,
        TransactionType::Payment,
        TransactionType::Transfer,
    ];

    /// Source-data label
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CashIn => "CASH_IN",
            TransactionType::CashOut => "CASH_OUT",
            TransactionType::Debit => "DEBIT",
            TransactionType::Payment => "PAYMENT",
            TransactionType::Transfer => "TRANSFER",
        }
    }

    /// Signed effect of the amount on (origin, destination) balances.
    ///
    /// Cash-in credits the originating customer and debits the receiving
    /// merchant; every other type moves money from origin to destination.
    pub fn balance_direction(&self) -> (f64, f64) {
        match self {
            TransactionType::CashIn => (1.0, -1.0),
            _ => (-1.0, 1.0),
        }
    }
}

impl FromStr for TransactionType {
    type Err = SchemaValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "CASH_IN" | "CASHIN" => Ok(TransactionType::CashIn),
            "CASH_OUT" | "CASHOUT" => Ok(TransactionType::CashOut),
            "DEBIT" => Ok(TransactionType::Debit),
            "PAYMENT" => Ok(TransactionType::Payment),
            "TRANSFER" => Ok(TransactionType::Transfer),
            _ => Err(SchemaValidationError::UnknownType(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, immutable transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub transaction_id: String,
    /// Discrete time step (one unit per simulated hour)
    pub step: u32,
    /// Transaction type
    pub txn_type: TransactionType,
    /// Amount moved (non-negative)
    pub amount: f64,
    /// Originating account
    pub name_orig: String,
    pub oldbalance_orig: f64,
    pub newbalance_orig: f64,
    /// Destination account
    pub name_dest: String,
    pub oldbalance_dest: f64,
    pub newbalance_dest: f64,
    /// Ground-truth label (training data only)
    pub is_fraud: Option<bool>,
    /// Flag raised by the legacy rule system
    pub is_flagged_fraud: Option<bool>,
}

/// Untyped record as delivered by the loader.
///
/// Every field is optional text so that malformed rows survive loading and are
/// rejected, counted, and logged during transformation instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default, alias = "TransactionID")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default, rename = "type", alias = "txn_type")]
    pub txn_type: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default, alias = "nameOrig")]
    pub name_orig: Option<String>,
    #[serde(default, alias = "oldbalanceOrg", alias = "oldbalanceOrig")]
    pub oldbalance_orig: Option<String>,
    #[serde(default, alias = "newbalanceOrig")]
    pub newbalance_orig: Option<String>,
    #[serde(default, alias = "nameDest")]
    pub name_dest: Option<String>,
    #[serde(default, alias = "oldbalanceDest")]
    pub oldbalance_dest: Option<String>,
    #[serde(default, alias = "newbalanceDest")]
    pub newbalance_dest: Option<String>,
    #[serde(default, alias = "isFraud")]
    pub is_fraud: Option<String>,
    #[serde(default, alias = "isFlaggedFraud")]
    pub is_flagged_fraud: Option<String>,
}

impl From<&Transaction> for RawTransaction {
    fn from(tx: &Transaction) -> Self {
        let flag = |v: Option<bool>| v.map(|b| if b { "1" } else { "0" }.to_string());
        Self {
            transaction_id: Some(tx.transaction_id.clone()),
            step: Some(tx.step.to_string()),
            txn_type: Some(tx.txn_type.as_str().to_string()),
            amount: Some(tx.amount.to_string()),
            name_orig: Some(tx.name_orig.clone()),
            oldbalance_orig: Some(tx.oldbalance_orig.to_string()),
            newbalance_orig: Some(tx.newbalance_orig.to_string()),
            name_dest: Some(tx.name_dest.clone()),
            oldbalance_dest: Some(tx.oldbalance_dest.to_string()),
            newbalance_dest: Some(tx.newbalance_dest.to_string()),
            is_fraud: flag(tx.is_fraud),
            is_flagged_fraud: flag(tx.is_flagged_fraud),
        }
    }
}
