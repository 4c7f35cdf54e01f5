//! Raw and Feature Transaction Tables

use crate::{quote_identifier, table_exists, StorageError};
use chrono::Utc;
use data_validator::{RawTransaction, TransactionType};
use feature_engine::{DatasetStats, FeatureSchema, FeatureVector};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use trainer::Partition;
use tracing::{debug, info};

const RAW_TABLE: &str = "transactions";
const FEATURE_TABLE: &str = "transformed_transactions";
const STATS_TABLE: &str = "feature_stats";

/// Leading non-feature columns of the feature table
const FEATURE_TABLE_KEYS: [&str; 9] = [
    "seq",
    "transaction_id",
    "step",
    "txn_type",
    "name_orig",
    "name_dest",
    "is_fraud",
    "is_flagged_fraud",
    "data_partition",
];

/// One row of the feature table
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub vector: FeatureVector,
    pub txn_type: TransactionType,
    pub name_orig: String,
    pub name_dest: String,
    pub is_flagged_fraud: Option<bool>,
    /// Absent for unlabelled rows
    pub partition: Option<Partition>,
}

/// Feature table with the schema and frozen statistics it was built with
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub stats: DatasetStats,
    pub records: Vec<FeatureRecord>,
}

#[derive(Debug, sqlx::FromRow)]
struct RawRow {
    transaction_id: Option<String>,
    step: Option<String>,
    txn_type: Option<String>,
    amount: Option<String>,
    name_orig: Option<String>,
    oldbalance_orig: Option<String>,
    newbalance_orig: Option<String>,
    name_dest: Option<String>,
    oldbalance_dest: Option<String>,
    newbalance_dest: Option<String>,
    is_fraud: Option<String>,
    is_flagged_fraud: Option<String>,
}

impl From<RawRow> for RawTransaction {
    fn from(row: RawRow) -> Self {
        Self {
            transaction_id: row.transaction_id,
            step: row.step,
            txn_type: row.txn_type,
            amount: row.amount,
            name_orig: row.name_orig,
            oldbalance_orig: row.oldbalance_orig,
            newbalance_orig: row.newbalance_orig,
            name_dest: row.name_dest,
            oldbalance_dest: row.oldbalance_dest,
            newbalance_dest: row.newbalance_dest,
            is_fraud: row.is_fraud,
            is_flagged_fraud: row.is_flagged_fraud,
        }
    }
}

/// Source database: raw transactions and the derived feature table
#[derive(Debug, Clone)]
pub struct TransactionStore {
    pool: SqlitePool,
}

impl TransactionStore {
    /// Wrap a pool and ensure the raw table exists
    pub async fn new(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                seq INTEGER PRIMARY KEY,
                transaction_id TEXT,
                step TEXT,
                txn_type TEXT,
                amount TEXT,
                name_orig TEXT,
                oldbalance_orig TEXT,
                newbalance_orig TEXT,
                name_dest TEXT,
                oldbalance_dest TEXT,
                newbalance_dest TEXT,
                is_fraud TEXT,
                is_flagged_fraud TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Replace the raw table with `records`, preserving their order
    pub async fn replace_raw(&self, records: &[RawTransaction]) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM transactions").execute(&mut *tx).await?;
        for (seq, r) in records.iter().enumerate() {
            sqlx::query(
                "INSERT INTO transactions (
                    seq, transaction_id, step, txn_type, amount, name_orig,
                    oldbalance_orig, newbalance_orig, name_dest, oldbalance_dest,
                    newbalance_dest, is_fraud, is_flagged_fraud
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(seq as i64)
            .bind(&r.transaction_id)
            .bind(&r.step)
            .bind(&r.txn_type)
            .bind(&r.amount)
            .bind(&r.name_orig)
            .bind(&r.oldbalance_orig)
            .bind(&r.newbalance_orig)
            .bind(&r.name_dest)
            .bind(&r.oldbalance_dest)
            .bind(&r.newbalance_dest)
            .bind(&r.is_fraud)
            .bind(&r.is_flagged_fraud)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(table = RAW_TABLE, rows = records.len(), "Raw transactions replaced");
        Ok(records.len() as u64)
    }

    /// Raw records in load order
    pub async fn load_raw(&self) -> Result<Vec<RawTransaction>, StorageError> {
        let rows: Vec<RawRow> = sqlx::query_as(
            "SELECT transaction_id, step, txn_type, amount, name_orig, oldbalance_orig,
                    newbalance_orig, name_dest, oldbalance_dest, newbalance_dest,
                    is_fraud, is_flagged_fraud
             FROM transactions ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "Raw transactions loaded");
        Ok(rows.into_iter().map(RawTransaction::from).collect())
    }

    pub async fn raw_count(&self) -> Result<u64, StorageError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    /// Replace the feature table and its statistics in one transaction
    pub async fn replace_features(&self, table: &FeatureTable) -> Result<u64, StorageError> {
        let feature_columns = table
            .schema
            .columns()
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Result<Vec<_>, _>>()?;
        let column_defs: String = feature_columns
            .iter()
            .map(|c| format!(",\n    {c} REAL NOT NULL"))
            .collect();
        let insert = format!(
            "INSERT INTO {FEATURE_TABLE} ({}, {}) VALUES ({})",
            FEATURE_TABLE_KEYS.join(", "),
            feature_columns.join(", "),
            vec!["?"; FEATURE_TABLE_KEYS.len() + feature_columns.len()].join(", ")
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {FEATURE_TABLE}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE {FEATURE_TABLE} (
    seq INTEGER PRIMARY KEY,
    transaction_id TEXT NOT NULL UNIQUE,
    step INTEGER NOT NULL,
    txn_type TEXT NOT NULL,
    name_orig TEXT NOT NULL,
    name_dest TEXT NOT NULL,
    is_fraud INTEGER,
    is_flagged_fraud INTEGER,
    data_partition TEXT{column_defs}
)"
        ))
        .execute(&mut *tx)
        .await?;

        for (seq, record) in table.records.iter().enumerate() {
            let v = &record.vector;
            if v.schema != table.schema || v.values.len() != feature_columns.len() {
                return Err(StorageError::SerializationError(format!(
                    "transaction {} does not match the table schema",
                    v.transaction_id
                )));
            }
            let mut query = sqlx::query(&insert)
                .bind(seq as i64)
                .bind(&v.transaction_id)
                .bind(i64::from(v.step))
                .bind(record.txn_type.as_str())
                .bind(&record.name_orig)
                .bind(&record.name_dest)
                .bind(v.is_fraud)
                .bind(record.is_flagged_fraud)
                .bind(record.partition.map(|p| p.as_str()));
            for value in &v.values {
                query = query.bind(*value);
            }
            query.execute(&mut *tx).await?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {STATS_TABLE} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                schema_json TEXT NOT NULL,
                stats_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {STATS_TABLE} (id, schema_json, stats_json, updated_at)
             VALUES (1, ?, ?, ?)"
        ))
        .bind(serde_json::to_string(&table.schema)?)
        .bind(serde_json::to_string(&table.stats)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            table = FEATURE_TABLE,
            rows = table.records.len(),
            columns = feature_columns.len(),
            "Feature table replaced"
        );
        Ok(table.records.len() as u64)
    }

    /// Load the feature table in transform order
    pub async fn load_features(&self) -> Result<FeatureTable, StorageError> {
        if !table_exists(&self.pool, STATS_TABLE).await? {
            return Err(StorageError::NotFound(FEATURE_TABLE.to_string()));
        }
        let (schema_json, stats_json): (String, String) = sqlx::query_as(&format!(
            "SELECT schema_json, stats_json FROM {STATS_TABLE} WHERE id = 1"
        ))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(STATS_TABLE.to_string()))?;
        let schema: FeatureSchema = serde_json::from_str(&schema_json)?;
        let stats: DatasetStats = serde_json::from_str(&stats_json)?;

        let feature_columns = schema
            .columns()
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Result<Vec<_>, _>>()?;
        let select = format!(
            "SELECT {}, {} FROM {FEATURE_TABLE} ORDER BY seq",
            FEATURE_TABLE_KEYS.join(", "),
            feature_columns.join(", ")
        );
        let rows = sqlx::query(&select).fetch_all(&self.pool).await?;

        let offset = FEATURE_TABLE_KEYS.len();
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let transaction_id: String = row.try_get("transaction_id")?;
            let step: i64 = row.try_get("step")?;
            let step = u32::try_from(step).map_err(|_| {
                StorageError::SerializationError(format!("step {step} of {transaction_id} out of range"))
            })?;
            let txn_type: String = row.try_get("txn_type")?;
            let txn_type: TransactionType = txn_type
                .parse()
                .map_err(|e| StorageError::SerializationError(format!("{e}")))?;
            let partition: Option<String> = row.try_get("data_partition")?;
            let partition = partition
                .map(|p| p.parse::<Partition>())
                .transpose()
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            let values = (0..feature_columns.len())
                .map(|i| row.try_get::<f64, _>(offset + i))
                .collect::<Result<Vec<_>, _>>()?;

            records.push(FeatureRecord {
                vector: FeatureVector {
                    transaction_id,
                    step,
                    schema: schema.clone(),
                    values,
                    is_fraud: row.try_get("is_fraud")?,
                },
                txn_type,
                name_orig: row.try_get("name_orig")?,
                name_dest: row.try_get("name_dest")?,
                is_flagged_fraud: row.try_get("is_flagged_fraud")?,
                partition,
            });
        }

        debug!(rows = records.len(), "Feature table loaded");
        Ok(FeatureTable {
            schema,
            stats,
            records,
        })
    }

    /// Rows in the feature table, zero when it was never written
    pub async fn feature_count(&self) -> Result<u64, StorageError> {
        if !table_exists(&self.pool, FEATURE_TABLE).await? {
            return Ok(0);
        }
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {FEATURE_TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}
