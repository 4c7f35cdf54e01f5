//! Prediction Table

use crate::StorageError;
use chrono::{DateTime, Utc};
use data_validator::TransactionType;
use inference_engine::{Prediction, RiskTier};
use sqlx::sqlite::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// A prediction with the raw transaction fields denormalised next to it
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub prediction: Prediction,
    pub step: u32,
    pub txn_type: TransactionType,
    pub amount: f64,
    pub name_orig: String,
    pub name_dest: String,
    /// Ground-truth label when the source carried one
    pub actual_fraud: Option<bool>,
}

#[derive(Debug, sqlx::FromRow)]
struct PredictionRow {
    prediction_id: String,
    transaction_id: String,
    step: i64,
    txn_type: String,
    amount: f64,
    name_orig: String,
    name_dest: String,
    actual_fraud: Option<bool>,
    fraud_probability: f64,
    is_fraud_predicted: bool,
    risk_tier: String,
    prediction_threshold: f64,
    model_version: i64,
    predicted_at: String,
}

impl TryFrom<PredictionRow> for PredictionRecord {
    type Error = StorageError;

    fn try_from(row: PredictionRow) -> Result<Self, Self::Error> {
        let bad = |what: &str, e: String| StorageError::SerializationError(format!("{what}: {e}"));
        Ok(Self {
            prediction: Prediction {
                prediction_id: Uuid::parse_str(&row.prediction_id).map_err(|e| bad("prediction_id", e.to_string()))?,
                transaction_id: row.transaction_id,
                probability: row.fraud_probability,
                is_fraud: row.is_fraud_predicted,
                risk_tier: row
                    .risk_tier
                    .parse::<RiskTier>()
                    .map_err(|e| bad("risk_tier", e.to_string()))?,
                threshold: row.prediction_threshold,
                model_version: u32::try_from(row.model_version)
                    .map_err(|e| bad("model_version", e.to_string()))?,
                predicted_at: DateTime::parse_from_rfc3339(&row.predicted_at)
                    .map_err(|e| bad("predicted_at", e.to_string()))?
                    .with_timezone(&Utc),
            },
            step: u32::try_from(row.step).map_err(|e| bad("step", e.to_string()))?,
            txn_type: row
                .txn_type
                .parse()
                .map_err(|e: data_validator::SchemaValidationError| bad("txn_type", e.to_string()))?,
            amount: row.amount,
            name_orig: row.name_orig,
            name_dest: row.name_dest,
            actual_fraud: row.actual_fraud,
        })
    }
}

/// Prediction database
#[derive(Debug, Clone)]
pub struct PredictionStore {
    pool: SqlitePool,
}

impl PredictionStore {
    /// Wrap a pool and ensure the prediction table exists
    pub async fn new(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fraud_predictions (
                prediction_id TEXT PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                txn_type TEXT NOT NULL,
                amount REAL NOT NULL,
                name_orig TEXT NOT NULL,
                name_dest TEXT NOT NULL,
                actual_fraud INTEGER,
                fraud_probability REAL NOT NULL
                    CHECK (fraud_probability >= 0 AND fraud_probability <= 1),
                is_fraud_predicted INTEGER NOT NULL,
                risk_tier TEXT NOT NULL CHECK (risk_tier IN ('LOW', 'MEDIUM', 'HIGH')),
                prediction_threshold REAL NOT NULL,
                model_version INTEGER NOT NULL,
                predicted_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Replace all predictions atomically
    pub async fn replace(&self, records: &[PredictionRecord]) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fraud_predictions")
            .execute(&mut *tx)
            .await?;
        for r in records {
            let p = &r.prediction;
            sqlx::query(
                "INSERT INTO fraud_predictions (
                    prediction_id, transaction_id, step, txn_type, amount, name_orig,
                    name_dest, actual_fraud, fraud_probability, is_fraud_predicted,
                    risk_tier, prediction_threshold, model_version, predicted_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(p.prediction_id.to_string())
            .bind(&p.transaction_id)
            .bind(i64::from(r.step))
            .bind(r.txn_type.as_str())
            .bind(r.amount)
            .bind(&r.name_orig)
            .bind(&r.name_dest)
            .bind(r.actual_fraud)
            .bind(p.probability)
            .bind(p.is_fraud)
            .bind(p.risk_tier.as_str())
            .bind(p.threshold)
            .bind(i64::from(p.model_version))
            .bind(p.predicted_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            rows = records.len(),
            flagged = records.iter().filter(|r| r.prediction.is_fraud).count(),
            "Predictions replaced"
        );
        Ok(records.len() as u64)
    }

    /// All predictions in step order
    pub async fn load_all(&self) -> Result<Vec<PredictionRecord>, StorageError> {
        let rows: Vec<PredictionRow> = sqlx::query_as(
            "SELECT prediction_id, transaction_id, step, txn_type, amount, name_orig,
                    name_dest, actual_fraud, fraud_probability, is_fraud_predicted,
                    risk_tier, prediction_threshold, model_version, predicted_at
             FROM fraud_predictions ORDER BY step, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PredictionRecord::try_from).collect()
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fraud_predictions")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect;

    fn record(id: &str, probability: f64) -> PredictionRecord {
        PredictionRecord {
            prediction: Prediction {
                prediction_id: Uuid::new_v4(),
                transaction_id: id.to_string(),
                probability,
                is_fraud: probability >= 0.5,
                risk_tier: RiskTier::Medium,
                threshold: 0.5,
                model_version: 2,
                predicted_at: DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            },
            step: 7,
            txn_type: TransactionType::CashOut,
            amount: 181.0,
            name_orig: "C840083671".to_string(),
            name_dest: "C38997010".to_string(),
            actual_fraud: Some(true),
        }
    }

    async fn store() -> PredictionStore {
        PredictionStore::new(connect("sqlite::memory:").await.unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store().await;
        let written = vec![record("t1", 0.42), record("t2", 0.91)];
        store.replace(&written).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), written);
    }

    #[tokio::test]
    async fn test_probability_bound_enforced_by_table() {
        let store = store().await;
        store.replace(&[record("t1", 0.3)]).await.unwrap();

        let err = store
            .replace(&[record("t2", 0.5), record("t3", 1.5)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DatabaseError(_)));
        assert!(store.replace(&[record("t4", -0.1)]).await.is_err());

        // Failed writes leave the previous predictions in place
        let kept = store.load_all().await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].prediction.transaction_id, "t1");
    }
}
