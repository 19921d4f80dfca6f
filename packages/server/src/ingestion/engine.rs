//! The ingestion engine: one end-to-end collection run.
//!
//! The engine owns the order of operations (resolve asset → narrow window →
//! rate limit → collect → map → load → log) and the failure classification.
//! It never propagates an error to its caller: every run, however it ends,
//! is summarized as an [`IngestOutcome`] and, when the pipeline got far
//! enough, a collection log row.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::collectors::{CollectorRegistry, Kwargs, RateLimiterRegistry};
use crate::common::{AssetType, ErrorCategory};

use super::asset_manager::Asset;
use super::collection_log::{CollectionLog, CollectionStatus, NewCollectionLog};
use super::data_loader::upsert_batch;
use super::incremental_tracker::narrow_window;
use super::schema_mapper::map_frame;

/// A single collection request, either from a scheduled job or a direct call.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub symbol: String,
    /// Raw wire string; an unrecognized value yields a failed outcome with
    /// `collector_type = "Unknown"` rather than an error.
    pub asset_type: String,
    /// Absent dates are computed fresh at call time: `end = now`,
    /// `start = end - 1 day`.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub collector_kwargs: Option<serde_json::Value>,
    pub asset_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Partial,
    Empty,
    Failed,
}

/// Summary of one run. `log_id` is present whenever a collection log row was
/// written (everything past asset resolution).
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub collector_type: String,
    pub asset_id: Option<i64>,
    pub log_id: Option<i64>,
    pub records_collected: i64,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
}

impl IngestOutcome {
    pub fn is_failure(&self) -> bool {
        self.status == IngestStatus::Failed
    }

    fn failed(collector_type: &str, category: ErrorCategory, message: String) -> Self {
        Self {
            status: IngestStatus::Failed,
            collector_type: collector_type.to_string(),
            asset_id: None,
            log_id: None,
            records_collected: 0,
            error_category: Some(category),
            error_message: Some(message),
            execution_time_ms: 0,
        }
    }
}

pub struct IngestionEngine {
    pool: PgPool,
    collectors: Arc<CollectorRegistry>,
    limiters: Arc<RateLimiterRegistry>,
    collect_timeout: Duration,
}

impl IngestionEngine {
    pub fn new(
        pool: PgPool,
        collectors: Arc<CollectorRegistry>,
        limiters: Arc<RateLimiterRegistry>,
        collect_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            collectors,
            limiters,
            collect_timeout,
        }
    }

    /// Run one collection. Cancellation (scheduler shutdown) is observed
    /// between suspension points; a cancelled run reports `failed` and the
    /// caller decides whether to record it.
    pub async fn ingest(&self, request: &IngestRequest, cancel: &CancellationToken) -> IngestOutcome {
        let run_started = std::time::Instant::now();

        // Dates are computed at call time, never at job registration.
        let end = request.end.unwrap_or_else(Utc::now);
        let start = request.start.unwrap_or_else(|| end - chrono::Duration::days(1));

        let asset = match Asset::get_or_create(
            &self.pool,
            &request.symbol,
            &request.asset_type,
            request.asset_metadata.as_ref(),
        )
        .await
        {
            Ok(asset) => asset,
            Err(e) => {
                // No asset, so no collection log either.
                error!(symbol = %request.symbol, error = %e, "failed to resolve asset");
                let mut outcome = IngestOutcome::failed(
                    "Unknown",
                    ErrorCategory::Persistence,
                    format!("failed to resolve asset: {e}"),
                );
                outcome.execution_time_ms = run_started.elapsed().as_millis() as i64;
                return outcome;
            }
        };

        let Some(collector) = self.collectors.get_by_name(&request.asset_type) else {
            let message = format!("unknown asset type: {}", request.asset_type);
            warn!(symbol = %request.symbol, asset_type = %request.asset_type, "{message}");
            let elapsed = run_started.elapsed().as_millis() as i64;
            let log_id = self
                .write_log(
                    asset.asset_id,
                    "Unknown",
                    start,
                    end,
                    0,
                    CollectionStatus::Failed,
                    Some(&message),
                    elapsed,
                )
                .await;
            return IngestOutcome {
                status: IngestStatus::Failed,
                collector_type: "Unknown".to_string(),
                asset_id: Some(asset.asset_id),
                log_id,
                records_collected: 0,
                error_category: Some(ErrorCategory::Validation),
                error_message: Some(message),
                execution_time_ms: elapsed,
            };
        };
        let collector_type = collector.name();

        // The registry only holds known types, so this parse cannot fail.
        let table = AssetType::parse(&request.asset_type)
            .map(|t| t.target_table())
            .expect("collector registry hit implies a known asset type");

        let kwargs: Kwargs = match &request.collector_kwargs {
            None => Kwargs::new(),
            Some(serde_json::Value::Object(map)) => map.clone(),
            Some(other) => {
                return self
                    .fail_with_log(
                        &asset,
                        collector_type,
                        start,
                        end,
                        ErrorCategory::Validation,
                        format!("collector_kwargs must be an object, got {other}"),
                        run_started,
                    )
                    .await;
            }
        };

        let window = match narrow_window(&self.pool, asset.asset_id, table, start, end).await {
            Ok(window) => window,
            Err(e) => {
                return self
                    .fail_with_log(
                        &asset,
                        collector_type,
                        start,
                        end,
                        ErrorCategory::Persistence,
                        format!("failed to narrow window: {e}"),
                        run_started,
                    )
                    .await;
            }
        };

        let Some((window_start, window_end)) = window else {
            // Already covered: no upstream call, but the short-circuit is
            // still logged.
            debug!(symbol = %request.symbol, asset_id = asset.asset_id, "window already persisted, skipping collect");
            let elapsed = run_started.elapsed().as_millis() as i64;
            let log_id = self
                .write_log(
                    asset.asset_id,
                    collector_type,
                    start,
                    end,
                    0,
                    CollectionStatus::Empty,
                    None,
                    elapsed,
                )
                .await;
            return IngestOutcome {
                status: IngestStatus::Empty,
                collector_type: collector_type.to_string(),
                asset_id: Some(asset.asset_id),
                log_id,
                records_collected: 0,
                error_category: None,
                error_message: None,
                execution_time_ms: elapsed,
            };
        };

        // Admission on the collector's shared limiter, abandoned on shutdown.
        let limiter = self.limiters.get(collector_type);
        tokio::select! {
            _ = limiter.acquire() => {}
            _ = cancel.cancelled() => {
                return IngestOutcome::failed(
                    collector_type,
                    ErrorCategory::Unknown,
                    "cancelled while waiting for a rate limit slot".to_string(),
                );
            }
        }

        let deadline = collector.collect_timeout().unwrap_or(self.collect_timeout);
        let collected = tokio::select! {
            result = tokio::time::timeout(
                deadline,
                collector.collect(&request.symbol, window_start, window_end, &kwargs),
            ) => match result {
                Ok(inner) => inner,
                Err(_) => Err(feeds::FeedError::Api(format!(
                    "collector timed out after {}s",
                    deadline.as_secs()
                ))),
            },
            _ = cancel.cancelled() => {
                return IngestOutcome::failed(
                    collector_type,
                    ErrorCategory::Unknown,
                    "cancelled during collect".to_string(),
                );
            }
        };

        let frame = match collected {
            Ok(frame) => frame,
            Err(e) => {
                let category = ErrorCategory::from(&e);
                return self
                    .fail_with_log(
                        &asset,
                        collector_type,
                        window_start,
                        window_end,
                        category,
                        e.to_string(),
                        run_started,
                    )
                    .await;
            }
        };

        let batch = match map_frame(
            AssetType::parse(&request.asset_type).expect("validated above"),
            asset.asset_id,
            &frame,
        ) {
            Ok(batch) => batch,
            Err(e) => {
                return self
                    .fail_with_log(
                        &asset,
                        collector_type,
                        window_start,
                        window_end,
                        ErrorCategory::Mapping,
                        e.to_string(),
                        run_started,
                    )
                    .await;
            }
        };

        let written = match upsert_batch(&self.pool, &batch).await {
            Ok(written) => written as i64,
            Err(e) => {
                return self
                    .fail_with_log(
                        &asset,
                        collector_type,
                        window_start,
                        window_end,
                        ErrorCategory::Persistence,
                        format!("failed to persist rows: {e}"),
                        run_started,
                    )
                    .await;
            }
        };

        let collected_rows = frame.len() as i64;
        let (status, log_status) = if written == 0 {
            (IngestStatus::Empty, CollectionStatus::Empty)
        } else if written < collected_rows {
            (IngestStatus::Partial, CollectionStatus::Partial)
        } else {
            (IngestStatus::Success, CollectionStatus::Success)
        };

        let elapsed = run_started.elapsed().as_millis() as i64;
        let log_id = self
            .write_log(
                asset.asset_id,
                collector_type,
                window_start,
                window_end,
                written as i32,
                log_status,
                None,
                elapsed,
            )
            .await;

        debug!(
            symbol = %request.symbol,
            asset_id = asset.asset_id,
            records = written,
            elapsed_ms = elapsed,
            "collection run finished"
        );

        IngestOutcome {
            status,
            collector_type: collector_type.to_string(),
            asset_id: Some(asset.asset_id),
            log_id,
            records_collected: written,
            error_category: None,
            error_message: None,
            execution_time_ms: elapsed,
        }
    }

    async fn fail_with_log(
        &self,
        asset: &Asset,
        collector_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: ErrorCategory,
        message: String,
        run_started: std::time::Instant,
    ) -> IngestOutcome {
        warn!(
            symbol = %asset.symbol,
            collector = collector_type,
            category = %category,
            "collection run failed: {message}"
        );
        let elapsed = run_started.elapsed().as_millis() as i64;
        let log_id = self
            .write_log(
                asset.asset_id,
                collector_type,
                start,
                end,
                0,
                CollectionStatus::Failed,
                Some(&message),
                elapsed,
            )
            .await;

        IngestOutcome {
            status: IngestStatus::Failed,
            collector_type: collector_type.to_string(),
            asset_id: Some(asset.asset_id),
            log_id,
            records_collected: 0,
            error_category: Some(category),
            error_message: Some(message),
            execution_time_ms: elapsed,
        }
    }

    /// Best-effort log insert; a failure here must not mask the run result.
    #[allow(clippy::too_many_arguments)]
    async fn write_log(
        &self,
        asset_id: i64,
        collector_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records: i32,
        status: CollectionStatus,
        error_message: Option<&str>,
        execution_time_ms: i64,
    ) -> Option<i64> {
        let result = CollectionLog::insert(
            &self.pool,
            NewCollectionLog {
                asset_id,
                collector_type,
                start_date: start,
                end_date: end,
                records_collected: records,
                status,
                error_message,
                execution_time_ms: Some(execution_time_ms),
            },
        )
        .await;

        match result {
            Ok(log_id) => Some(log_id),
            Err(e) => {
                error!(asset_id, error = %e, "failed to write collection log");
                None
            }
        }
    }
}
