//! Request bodies for the scheduler API.
//!
//! Bodies are deserialized from `serde_json::Value` inside the handlers so
//! malformed input lands in the 400 envelope instead of axum's default 422.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::AssetType;
use crate::config::Config;
use crate::scheduler::{JobStatus, ScheduledJob, Trigger, TriggerType};

use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct JobCreateRequest {
    pub symbol: String,
    pub asset_type: AssetType,
    pub trigger_type: TriggerType,
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collector_kwargs: Option<serde_json::Value>,
    #[serde(default)]
    pub asset_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<i32>,
    #[serde(default)]
    pub retry_backoff_multiplier: Option<f64>,
}

impl JobCreateRequest {
    /// Validate and convert into a `pending` job row.
    pub fn into_job(self, defaults: &Config) -> Result<ScheduledJob, ApiError> {
        validate_symbol_field(&self.symbol)?;
        validate_dates(self.start_date, self.end_date)?;
        validate_trigger(self.trigger_type, &self.trigger_config)?;

        let job_id = match self.job_id {
            Some(job_id) => {
                if job_id.is_empty() || job_id.len() > 255 {
                    return Err(ApiError::Validation(
                        "job_id must be between 1 and 255 characters".to_string(),
                    ));
                }
                job_id
            }
            None => generate_job_id(&self.symbol, self.asset_type, self.trigger_type),
        };

        let max_retries = self.max_retries.unwrap_or(defaults.default_max_retries);
        if max_retries < 0 {
            return Err(ApiError::Validation("max_retries must not be negative".to_string()));
        }
        let retry_delay_seconds = self.retry_delay_seconds.unwrap_or(60);
        if retry_delay_seconds < 0 {
            return Err(ApiError::Validation(
                "retry_delay_seconds must not be negative".to_string(),
            ));
        }
        let retry_backoff_multiplier = self.retry_backoff_multiplier.unwrap_or(2.0);
        if retry_backoff_multiplier < 1.0 {
            return Err(ApiError::Validation(
                "retry_backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(ScheduledJob {
            job_id,
            symbol: self.symbol,
            asset_type: self.asset_type,
            trigger_type: self.trigger_type,
            trigger_config: self.trigger_config,
            start_date: self.start_date,
            end_date: self.end_date,
            collector_kwargs: self.collector_kwargs,
            asset_metadata: self.asset_metadata,
            status: JobStatus::Pending,
            max_retries,
            retry_delay_seconds,
            retry_backoff_multiplier,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at: None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JobUpdateRequest {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub asset_type: Option<AssetType>,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_config: Option<serde_json::Value>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collector_kwargs: Option<serde_json::Value>,
    #[serde(default)]
    pub asset_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<i32>,
    #[serde(default)]
    pub retry_backoff_multiplier: Option<f64>,
}

impl JobUpdateRequest {
    /// Apply the patch to a loaded job. Returns whether schedule-relevant
    /// fields changed (the caller then re-queues the job for adoption).
    pub fn apply(self, job: &mut ScheduledJob) -> Result<bool, ApiError> {
        let mut schedule_changed = false;

        if let Some(symbol) = self.symbol {
            validate_symbol_field(&symbol)?;
            job.symbol = symbol;
        }
        if let Some(asset_type) = self.asset_type {
            job.asset_type = asset_type;
        }
        if let Some(trigger_type) = self.trigger_type {
            job.trigger_type = trigger_type;
            schedule_changed = true;
        }
        if let Some(trigger_config) = self.trigger_config {
            job.trigger_config = trigger_config;
            schedule_changed = true;
        }
        if let Some(start_date) = self.start_date {
            job.start_date = Some(start_date);
            schedule_changed = true;
        }
        if let Some(end_date) = self.end_date {
            job.end_date = Some(end_date);
            schedule_changed = true;
        }
        if let Some(collector_kwargs) = self.collector_kwargs {
            job.collector_kwargs = Some(collector_kwargs);
        }
        if let Some(asset_metadata) = self.asset_metadata {
            job.asset_metadata = Some(asset_metadata);
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries < 0 {
                return Err(ApiError::Validation("max_retries must not be negative".to_string()));
            }
            job.max_retries = max_retries;
        }
        if let Some(retry_delay_seconds) = self.retry_delay_seconds {
            if retry_delay_seconds < 0 {
                return Err(ApiError::Validation(
                    "retry_delay_seconds must not be negative".to_string(),
                ));
            }
            job.retry_delay_seconds = retry_delay_seconds;
        }
        if let Some(retry_backoff_multiplier) = self.retry_backoff_multiplier {
            if retry_backoff_multiplier < 1.0 {
                return Err(ApiError::Validation(
                    "retry_backoff_multiplier must be at least 1.0".to_string(),
                ));
            }
            job.retry_backoff_multiplier = retry_backoff_multiplier;
        }
        if let Some(status) = self.status {
            job.status = status;
            schedule_changed = true;
        }

        validate_dates(job.start_date, job.end_date)?;
        validate_trigger(job.trigger_type, &job.trigger_config)?;
        Ok(schedule_changed)
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub asset_type: String,
    pub symbol: String,
    #[serde(default)]
    pub collector_kwargs: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: String,
    pub triggered: bool,
    pub message: String,
}

fn validate_symbol_field(symbol: &str) -> Result<(), ApiError> {
    if symbol.is_empty() {
        return Err(ApiError::Validation("symbol must not be empty".to_string()));
    }
    if symbol.len() > 100 {
        return Err(ApiError::Validation(
            "symbol must be at most 100 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_dates(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ApiError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ApiError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_trigger(
    trigger_type: TriggerType,
    trigger_config: &serde_json::Value,
) -> Result<(), ApiError> {
    Trigger::parse(trigger_type, trigger_config)
        .map(|_| ())
        .map_err(|e| ApiError::Validation(format!("invalid trigger_config: {e}")))
}

fn generate_job_id(symbol: &str, asset_type: AssetType, trigger_type: TriggerType) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        symbol.to_lowercase().replace(['/', ' '], "_"),
        asset_type,
        trigger_type.as_str(),
        &suffix[..8]
    )
}
