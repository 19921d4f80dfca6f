//! Scheduled job model and its SQL operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::AssetType;

use super::triggers::{FireBounds, Trigger, TriggerError, TriggerType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet picked up by a running scheduler.
    #[default]
    Pending,
    Active,
    Paused,
    /// The trigger has no further fire times.
    Completed,
    /// Retries exhausted on a one-shot trigger.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

const JOB_COLUMNS: &str = "job_id, symbol, asset_type, trigger_type, trigger_config, \
     start_date, end_date, collector_kwargs, asset_metadata, status, \
     max_retries, retry_delay_seconds, retry_backoff_multiplier, \
     created_at, updated_at, last_run_at, next_run_at";

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub symbol: String,
    pub asset_type: AssetType,
    pub trigger_type: TriggerType,
    pub trigger_config: serde_json::Value,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub collector_kwargs: Option<serde_json::Value>,
    pub asset_metadata: Option<serde_json::Value>,
    pub status: JobStatus,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    pub retry_backoff_multiplier: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    /// Parse this job's trigger configuration.
    pub fn trigger(&self) -> Result<Trigger, TriggerError> {
        Trigger::parse(self.trigger_type, &self.trigger_config)
    }

    /// Date bounds handed to the trigger evaluator.
    pub fn fire_bounds(&self) -> FireBounds {
        FireBounds {
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: self.created_at,
        }
    }

    /// Delay before retry attempt `attempt + 1`, growing exponentially:
    /// `retry_delay * backoff^(attempt-1)`.
    pub fn retry_delay(&self, attempt: i32) -> std::time::Duration {
        let base = self.retry_delay_seconds.max(0) as f64;
        let factor = self.retry_backoff_multiplier.powi((attempt - 1).max(0));
        std::time::Duration::from_secs_f64((base * factor).max(0.0))
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<ScheduledJob, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            r#"
            INSERT INTO scheduled_jobs (
                job_id, symbol, asset_type, trigger_type, trigger_config,
                start_date, end_date, collector_kwargs, asset_metadata, status,
                max_retries, retry_delay_seconds, retry_backoff_multiplier
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&self.job_id)
        .bind(&self.symbol)
        .bind(self.asset_type)
        .bind(self.trigger_type)
        .bind(&self.trigger_config)
        .bind(self.start_date)
        .bind(self.end_date)
        .bind(&self.collector_kwargs)
        .bind(&self.asset_metadata)
        .bind(self.status)
        .bind(self.max_retries)
        .bind(self.retry_delay_seconds)
        .bind(self.retry_backoff_multiplier)
        .fetch_one(pool)
        .await
    }

    /// Persist an edited job row (PATCH). `created_at` and `last_run_at`
    /// are never rewritten here.
    pub async fn update(&self, pool: &PgPool) -> Result<ScheduledJob, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            r#"
            UPDATE scheduled_jobs SET
                symbol = $1, asset_type = $2, trigger_type = $3, trigger_config = $4,
                start_date = $5, end_date = $6, collector_kwargs = $7, asset_metadata = $8,
                status = $9, max_retries = $10, retry_delay_seconds = $11,
                retry_backoff_multiplier = $12, next_run_at = $13, updated_at = NOW()
            WHERE job_id = $14
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&self.symbol)
        .bind(self.asset_type)
        .bind(self.trigger_type)
        .bind(&self.trigger_config)
        .bind(self.start_date)
        .bind(self.end_date)
        .bind(&self.collector_kwargs)
        .bind(&self.asset_metadata)
        .bind(self.status)
        .bind(self.max_retries)
        .bind(self.retry_delay_seconds)
        .bind(self.retry_backoff_multiplier)
        .bind(self.next_run_at)
        .bind(&self.job_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        job_id: &str,
    ) -> Result<Option<ScheduledJob>, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY created_at DESC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, job_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Jobs that should fire now: active with a due `next_run_at`.
    pub async fn due(pool: &PgPool, limit: i64) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scheduled_jobs
            WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= NOW()
            ORDER BY next_run_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Jobs a running scheduler still has to adopt.
    pub async fn pending(pool: &PgPool) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE status = 'pending'"
        ))
        .fetch_all(pool)
        .await
    }

    /// Everything the scheduler owns on startup (pending, active, paused).
    pub async fn load_for_startup(pool: &PgPool) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scheduled_jobs
            WHERE status IN ('pending', 'active', 'paused')
            "#
        ))
        .fetch_all(pool)
        .await
    }

    /// Set status and next_run_at in one durable step.
    pub async fn set_schedule<'e, E: sqlx::PgExecutor<'e>>(
        executor: E,
        job_id: &str,
        status: JobStatus,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET status = $1, next_run_at = $2, updated_at = NOW()
            WHERE job_id = $3
            "#,
        )
        .bind(status)
        .bind(next_run_at)
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record a finished successful run: `last_run_at` advances and the next
    /// fire (or terminal status) is persisted atomically.
    pub async fn complete_run<'e, E: sqlx::PgExecutor<'e>>(
        executor: E,
        job_id: &str,
        last_run_at: DateTime<Utc>,
        status: JobStatus,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET last_run_at = $1, status = $2, next_run_at = $3, updated_at = NOW()
            WHERE job_id = $4
            "#,
        )
        .bind(last_run_at)
        .bind(status)
        .bind(next_run_at)
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Counts by `(asset_type, status)` for the status gauges.
    pub async fn status_counts(
        pool: &PgPool,
    ) -> Result<Vec<(AssetType, JobStatus, i64)>, sqlx::Error> {
        let rows: Vec<(AssetType, JobStatus, i64)> = sqlx::query_as(
            r#"
            SELECT asset_type, status, COUNT(*)
            FROM scheduled_jobs
            GROUP BY asset_type, status
            "#,
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_job() -> ScheduledJob {
        ScheduledJob {
            job_id: "aapl_stock_test".to_string(),
            symbol: "AAPL".to_string(),
            asset_type: AssetType::Stock,
            trigger_type: TriggerType::Interval,
            trigger_config: serde_json::json!({"hours": 1}),
            start_date: None,
            end_date: None,
            collector_kwargs: None,
            asset_metadata: None,
            status: JobStatus::Pending,
            max_retries: 3,
            retry_delay_seconds: 60,
            retry_backoff_multiplier: 2.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let job = sample_job();
        assert_eq!(job.retry_delay(1).as_secs(), 60);
        assert_eq!(job.retry_delay(2).as_secs(), 120);
        assert_eq!(job.retry_delay(3).as_secs(), 240);
    }

    #[test]
    fn retry_delay_with_unit_backoff_is_constant() {
        let mut job = sample_job();
        job.retry_backoff_multiplier = 1.0;
        job.retry_delay_seconds = 5;
        assert_eq!(job.retry_delay(1).as_secs(), 5);
        assert_eq!(job.retry_delay(4).as_secs(), 5);
    }

    #[test]
    fn trigger_parses_from_stored_config() {
        let job = sample_job();
        assert!(job.trigger().is_ok());
    }

    #[test]
    fn corrupt_trigger_config_surfaces_as_error() {
        let mut job = sample_job();
        job.trigger_config = serde_json::json!({"bogus": 1});
        assert!(job.trigger().is_err());
    }
}
