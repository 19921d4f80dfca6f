//! Job execution bookkeeping.
//!
//! One row per attempt: inserted as `running` when the attempt starts,
//! updated exactly once to a terminal state (`completed`, `failed`) or to
//! `retrying`, and never touched again afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Retrying,
}

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct JobExecution {
    pub execution_id: i64,
    pub job_id: String,
    pub log_id: Option<i64>,
    pub execution_status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_category: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

impl JobExecution {
    /// Insert the row for a starting attempt.
    pub async fn insert_running(
        pool: &PgPool,
        job_id: &str,
        attempt: i32,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO job_executions (job_id, execution_status, started_at, attempt)
            VALUES ($1, 'running', NOW(), $2)
            RETURNING execution_id
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .fetch_one(pool)
        .await
    }

    /// Move an attempt to its terminal (or retrying) state.
    ///
    /// Generic over the executor so the scheduler can pair this with the
    /// job-row update in one transaction.
    pub async fn finalize<'e, E: sqlx::PgExecutor<'e>>(
        executor: E,
        execution_id: i64,
        status: ExecutionStatus,
        log_id: Option<i64>,
        error_message: Option<&str>,
        error_category: Option<ErrorCategory>,
        execution_time_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE job_executions
            SET execution_status = $1,
                log_id = $2,
                completed_at = NOW(),
                error_message = $3,
                error_category = $4,
                execution_time_ms = $5
            WHERE execution_id = $6
            "#,
        )
        .bind(status)
        .bind(log_id)
        .bind(error_message)
        .bind(error_category.map(|c| c.as_str()))
        .bind(execution_time_ms)
        .bind(execution_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Execution history for one job, newest first.
    pub async fn list_for_job(
        pool: &PgPool,
        job_id: &str,
        limit: i64,
    ) -> Result<Vec<JobExecution>, sqlx::Error> {
        sqlx::query_as::<_, JobExecution>(
            r#"
            SELECT execution_id, job_id, log_id, execution_status, started_at,
                   completed_at, error_message, error_category, execution_time_ms,
                   attempt, created_at
            FROM job_executions
            WHERE job_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Finalize `running` executions abandoned by a previous process.
    ///
    /// Anything still `running` whose start is older than the collector
    /// timeout cannot have a live worker behind it; restart recovery marks
    /// it failed and the parent job is rescheduled by the startup pass.
    pub async fn recover_abandoned(
        pool: &PgPool,
        older_than: std::time::Duration,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET execution_status = 'failed',
                completed_at = NOW(),
                error_message = 'abandoned at restart',
                error_category = 'unknown'
            WHERE execution_status = 'running'
              AND started_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(older_than.as_secs().to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
