//! Validation Error Types

use thiserror::Error;

/// Per-record schema errors. Fatal for the record, never for the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaValidationError {
    /// Required field absent or blank
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// Field present but not parseable as its semantic type
    #[error("Invalid {field}: {value:?} is not a valid {expected}")]
    InvalidFormat {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Numeric value outside its allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Transaction type not in the known set
    #[error("Unknown transaction type: {0:?}")]
    UnknownType(String),

    /// Transaction id already seen earlier in the batch
    #[error("Duplicate transaction id: {0:?}")]
    DuplicateId(String),
}

impl SchemaValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            SchemaValidationError::MissingField { field }
            | SchemaValidationError::InvalidFormat { field, .. }
            | SchemaValidationError::OutOfRange { field, .. } => field,
            SchemaValidationError::UnknownType(_) => "type",
            SchemaValidationError::DuplicateId(_) => "transaction_id",
        }
    }
}
