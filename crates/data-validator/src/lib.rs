//! Transaction Schema and Validation
//!
//! Defines the transaction record flowing through the pipeline, parses untyped
//! raw records into it, and checks the balance invariant per transaction type.

mod error;
mod transaction;
mod validator;

pub use error::SchemaValidationError;
pub use transaction::{RawTransaction, Transaction, TransactionType};
pub use validator::{BalanceCheck, ValidationConfig, Validator};
