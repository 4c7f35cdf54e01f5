//! Record Validator

use crate::error::SchemaValidationError;
use crate::transaction::{RawTransaction, Transaction, TransactionType};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Largest amount accepted as a real transaction
    pub max_amount: f64,
    /// Absolute tolerance when checking balance-after against balance-before
    pub balance_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_amount: 1.0e11,
            balance_tolerance: 0.01,
        }
    }
}

/// Outcome of the balance invariant check for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceCheck {
    /// Origin balance-after matches balance-before and amount
    pub origin_consistent: bool,
    /// Destination balance-after matches balance-before and amount
    pub destination_consistent: bool,
}

/// Validator for transaction records
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Parse and validate a raw record into a typed transaction
    pub fn validate(&self, raw: &RawTransaction) -> Result<Transaction, SchemaValidationError> {
        let transaction_id = required("transaction_id", &raw.transaction_id)?.to_string();
        let step = parse_step(required("step", &raw.step)?)?;
        let txn_type: TransactionType = required("type", &raw.txn_type)?.parse()?;

        let tx = Transaction {
            transaction_id,
            step,
            txn_type,
            amount: parse_decimal("amount", required("amount", &raw.amount)?)?,
            name_orig: required("name_orig", &raw.name_orig)?.to_string(),
            oldbalance_orig: parse_decimal(
                "oldbalance_orig",
                required("oldbalance_orig", &raw.oldbalance_orig)?,
            )?,
            newbalance_orig: parse_decimal(
                "newbalance_orig",
                required("newbalance_orig", &raw.newbalance_orig)?,
            )?,
            name_dest: required("name_dest", &raw.name_dest)?.to_string(),
            oldbalance_dest: parse_decimal(
                "oldbalance_dest",
                required("oldbalance_dest", &raw.oldbalance_dest)?,
            )?,
            newbalance_dest: parse_decimal(
                "newbalance_dest",
                required("newbalance_dest", &raw.newbalance_dest)?,
            )?,
            is_fraud: optional_flag("is_fraud", &raw.is_fraud)?,
            is_flagged_fraud: optional_flag("is_flagged_fraud", &raw.is_flagged_fraud)?,
        };

        self.check_semantics(&tx)?;
        trace!(transaction_id = %tx.transaction_id, "Record validated");
        Ok(tx)
    }

    /// Check the semantic constraints of an already-typed transaction
    pub fn check_semantics(&self, tx: &Transaction) -> Result<(), SchemaValidationError> {
        if tx.transaction_id.trim().is_empty() {
            return Err(SchemaValidationError::MissingField { field: "transaction_id" });
        }
        if tx.name_orig.trim().is_empty() {
            return Err(SchemaValidationError::MissingField { field: "name_orig" });
        }
        if tx.name_dest.trim().is_empty() {
            return Err(SchemaValidationError::MissingField { field: "name_dest" });
        }

        self.validate_range("amount", tx.amount, (0.0, self.config.max_amount))?;
        for (field, value) in [
            ("oldbalance_orig", tx.oldbalance_orig),
            ("newbalance_orig", tx.newbalance_orig),
            ("oldbalance_dest", tx.oldbalance_dest),
            ("newbalance_dest", tx.newbalance_dest),
        ] {
            if !value.is_finite() {
                return Err(SchemaValidationError::InvalidFormat {
                    field,
                    value: value.to_string(),
                    expected: "finite decimal",
                });
            }
        }
        Ok(())
    }

    /// Validate a single value against a range
    pub fn validate_range(
        &self,
        field: &'static str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), SchemaValidationError> {
        // NaN fails both comparisons, so test for it explicitly
        if value.is_nan() || value < range.0 || value > range.1 {
            Err(SchemaValidationError::OutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    /// Check balance-after against balance-before and amount, per direction
    pub fn balance_consistency(&self, tx: &Transaction) -> BalanceCheck {
        let (orig_sign, dest_sign) = tx.txn_type.balance_direction();
        let tolerance = self.config.balance_tolerance;

        let expected_orig = tx.oldbalance_orig + orig_sign * tx.amount;
        let expected_dest = tx.oldbalance_dest + dest_sign * tx.amount;

        BalanceCheck {
            origin_consistent: (tx.newbalance_orig - expected_orig).abs() <= tolerance,
            destination_consistent: (tx.newbalance_dest - expected_dest).abs() <= tolerance,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

fn required<'a>(
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, SchemaValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SchemaValidationError::MissingField { field }),
    }
}

fn parse_step(value: &str) -> Result<u32, SchemaValidationError> {
    value
        .parse::<u32>()
        .map_err(|_| SchemaValidationError::InvalidFormat {
            field: "step",
            value: value.to_string(),
            expected: "non-negative integer",
        })
}

fn parse_decimal(field: &'static str, value: &str) -> Result<f64, SchemaValidationError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SchemaValidationError::InvalidFormat {
            field,
            value: value.to_string(),
            expected: "decimal",
        }),
    }
}

fn optional_flag(
    field: &'static str,
    value: &Option<String>,
) -> Result<Option<bool>, SchemaValidationError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some("1") | Some("1.0") => Ok(Some(true)),
        Some("0") | Some("0.0") => Ok(Some(false)),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(v) => Err(SchemaValidationError::InvalidFormat {
            field,
            value: v.to_string(),
            expected: "0/1 flag",
        }),
    }
}
