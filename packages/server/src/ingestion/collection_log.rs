//! Collection log bookkeeping.
//!
//! One row per collector invocation, and one per incremental short-circuit
//! (status `empty`), so the log answers "what did we ask the upstream for,
//! and what came back" even when nothing was fetched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "collection_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Success,
    /// Some rows were persisted, but fewer than the collector produced.
    Partial,
    Empty,
    Failed,
}

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct CollectionLog {
    pub log_id: i64,
    pub asset_id: i64,
    pub collector_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub records_collected: i32,
    pub status: CollectionStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new log row; the id and timestamp come from the database.
pub struct NewCollectionLog<'a> {
    pub asset_id: i64,
    pub collector_type: &'a str,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub records_collected: i32,
    pub status: CollectionStatus,
    pub error_message: Option<&'a str>,
    pub execution_time_ms: Option<i64>,
}

impl CollectionLog {
    pub async fn insert(pool: &PgPool, log: NewCollectionLog<'_>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO collection_logs (
                asset_id, collector_type, start_date, end_date,
                records_collected, status, error_message, execution_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING log_id
            "#,
        )
        .bind(log.asset_id)
        .bind(log.collector_type)
        .bind(log.start_date)
        .bind(log.end_date)
        .bind(log.records_collected)
        .bind(log.status)
        .bind(log.error_message)
        .bind(log.execution_time_ms)
        .fetch_one(pool)
        .await
    }

    /// Most recent logs, newest first.
    pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<CollectionLog>, sqlx::Error> {
        sqlx::query_as::<_, CollectionLog>(
            r#"
            SELECT log_id, asset_id, collector_type, start_date, end_date,
                   records_collected, status, error_message, execution_time_ms, created_at
            FROM collection_logs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
