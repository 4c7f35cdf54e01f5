//! Storage Layer
//!
//! SQLite-backed tables for each pipeline stage plus a file-based model
//! registry. Every write replaces its output atomically.

mod predictions;
mod registry;
mod transactions;

pub use predictions::{PredictionRecord, PredictionStore};
pub use registry::ModelRegistry;
pub use transactions::{FeatureRecord, FeatureTable, TransactionStore};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model version {0} is already published")]
    VersionExists(u32),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Open a SQLite pool, creating the database file when missing.
///
/// In-memory URLs get a single connection so every query sees the same
/// database.
pub async fn connect(url: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let max_connections = if url.contains(":memory:") { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    info!(url, max_connections, "Connected to SQLite");
    Ok(pool)
}

/// Identifier safe to splice into SQL: lowercase ASCII, digits, underscores
pub(crate) fn quote_identifier(name: &str) -> Result<String, StorageError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StorageError::SerializationError(format!(
            "invalid column name {name:?}"
        )))
    }
}

/// Whether a table exists in the connected database
pub(crate) async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool, StorageError> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("orig_txn_count_1h").unwrap(), "\"orig_txn_count_1h\"");
        assert!(quote_identifier("amount\"; DROP TABLE x; --").is_err());
        assert!(quote_identifier("").is_err());
    }

    #[tokio::test]
    async fn test_memory_connect() {
        let pool = connect("sqlite::memory:").await.unwrap();
        assert!(!table_exists(&pool, "transactions").await.unwrap());
    }
}
