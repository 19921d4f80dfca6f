//! End-to-end scheduler scenarios against a real Postgres.
//!
//! These tests drive the full stack (scheduler loop, ingestion engine, data
//! loader, HTTP API) with stub collectors standing in for the upstreams.
//! They are ignored by default; point `DATABASE_URL` at a scratch Postgres
//! and run `cargo test -- --ignored` to execute them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use feeds::FeedError;
use platform_core::collectors::{
    Collector, CollectorMetadata, CollectorRegistry, Frame, FrameRow, Kwargs,
    RateLimiterRegistry, SymbolMatch,
};
use platform_core::common::{AssetType, ErrorCategory};
use platform_core::ingestion::{IngestRequest, IngestStatus, IngestionEngine};
use platform_core::metrics::SchedulerMetrics;
use platform_core::scheduler::{
    EventHub, ExecutionStatus, JobStatus, PersistentScheduler, ScheduledJob, SchedulerConfig,
    TriggerType,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Stub collector: fails with an `api` error for the first `fail_times`
/// calls, then returns one OHLCV bar per call.
struct StubCollector {
    asset_type: AssetType,
    calls: Arc<AtomicUsize>,
    fail_times: usize,
}

impl StubCollector {
    fn new(asset_type: AssetType, fail_times: usize) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                asset_type,
                calls: calls.clone(),
                fail_times,
            }),
            calls,
        )
    }
}

#[async_trait]
impl Collector for StubCollector {
    fn name(&self) -> &'static str {
        "StubCollector"
    }

    fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type,
            source: "stub",
            requires_credentials: false,
            credentials_configured: true,
            description: "test stub",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn validate_params(&self, _symbol: &str, _kwargs: &Kwargs) -> Result<(), FeedError> {
        Ok(())
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SymbolMatch>, FeedError> {
        Ok(Vec::new())
    }

    async fn collect(
        &self,
        _symbol: &str,
        _start: DateTime<Utc>,
        end: DateTime<Utc>,
        _kwargs: &Kwargs,
    ) -> Result<Frame, FeedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            return Err(FeedError::Api(format!("stub failure #{}", call + 1)));
        }
        let mut values = BTreeMap::new();
        values.insert("open".to_string(), 100.0);
        values.insert("high".to_string(), 101.0);
        values.insert("low".to_string(), 99.0);
        values.insert("close".to_string(), 100.5);
        values.insert("volume".to_string(), 1000.0);
        Ok(Frame::new(vec![FrameRow { time: end, values }]))
    }
}

struct Harness {
    pool: PgPool,
    scheduler: Arc<PersistentScheduler>,
    engine: Arc<IngestionEngine>,
    calls: Arc<AtomicUsize>,
}

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a scratch Postgres for the ignored e2e tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

async fn harness(fail_times: usize) -> Harness {
    let pool = test_pool().await;

    let (stub, calls) = StubCollector::new(AssetType::Stock, fail_times);
    let mut registry = CollectorRegistry::empty();
    registry.register(stub);
    let registry = Arc::new(registry);

    let limiters = Arc::new(RateLimiterRegistry::new(100, Duration::from_secs(60)));
    let engine = Arc::new(IngestionEngine::new(
        pool.clone(),
        registry,
        limiters,
        Duration::from_secs(30),
    ));
    let scheduler = Arc::new(PersistentScheduler::new(
        pool.clone(),
        engine.clone(),
        EventHub::new(),
        Arc::new(SchedulerMetrics::new()),
        SchedulerConfig {
            tick_interval: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(5),
            ..SchedulerConfig::default()
        },
    ));

    Harness {
        pool,
        scheduler,
        engine,
        calls,
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn job(job_id: &str, symbol: &str, trigger_type: TriggerType, config: serde_json::Value) -> ScheduledJob {
    let now = Utc::now();
    ScheduledJob {
        job_id: job_id.to_string(),
        symbol: symbol.to_string(),
        asset_type: AssetType::Stock,
        trigger_type,
        trigger_config: config,
        start_date: None,
        end_date: None,
        collector_kwargs: None,
        asset_metadata: None,
        status: JobStatus::Pending,
        max_retries: 3,
        retry_delay_seconds: 60,
        retry_backoff_multiplier: 2.0,
        created_at: now,
        updated_at: now,
        last_run_at: None,
        next_run_at: None,
    }
}

async fn wait_for<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn cron_job_is_adopted_with_the_next_fire_time() {
    let h = harness(0).await;
    let job_id = unique("cron_adopt");
    job(&job_id, &unique("AAPL"), TriggerType::Cron,
        serde_json::json!({"hour": "9", "minute": "30"}))
        .insert(&h.pool)
        .await
        .unwrap();

    h.scheduler.startup().await.unwrap();

    let adopted = ScheduledJob::find_by_id(&h.pool, &job_id).await.unwrap().unwrap();
    assert_eq!(adopted.status, JobStatus::Active);
    let next = adopted.next_run_at.expect("active job has a fire time");
    assert!(next > Utc::now());
    assert_eq!(next.format("%H:%M:%S").to_string(), "09:30:00");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn interval_job_fires_and_reschedules() {
    let h = harness(0).await;
    let job_id = unique("interval_fire");
    job(&job_id, &unique("AAPL"), TriggerType::Interval,
        serde_json::json!({"seconds": 1}))
        .insert(&h.pool)
        .await
        .unwrap();

    h.scheduler.startup().await.unwrap();
    let runner = h.scheduler.clone();
    let loop_handle = tokio::spawn(async move { runner.run().await });

    let pool = h.pool.clone();
    let fired = wait_for(
        || {
            let pool = pool.clone();
            let job_id = job_id.clone();
            async move {
                platform_core::scheduler::JobExecution::list_for_job(&pool, &job_id, 10)
                    .await
                    .unwrap()
                    .iter()
                    .any(|e| e.execution_status == ExecutionStatus::Completed)
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(fired, "expected a completed execution within 10s");

    let updated = ScheduledJob::find_by_id(&h.pool, &job_id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Active);
    assert!(updated.last_run_at.is_some());
    assert!(updated.next_run_at.unwrap() > updated.last_run_at.unwrap());

    h.scheduler.begin_shutdown();
    let _ = loop_handle.await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn incremental_skip_avoids_the_upstream_call() {
    let h = harness(0).await;
    let symbol = unique("AAPL");

    // Fixed window: the first run persists a bar stamped at the window end,
    // so the identical second request is fully covered and short-circuits.
    let end = Utc::now();
    let request = IngestRequest {
        symbol: symbol.clone(),
        asset_type: "stock".to_string(),
        start: Some(end - ChronoDuration::days(1)),
        end: Some(end),
        collector_kwargs: None,
        asset_metadata: None,
    };
    let cancel = tokio_util::sync::CancellationToken::new();
    let first = h.engine.ingest(&request, &cancel).await;
    assert_eq!(first.status, IngestStatus::Success);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    let second = h.engine.ingest(&request, &cancel).await;
    assert_eq!(second.status, IngestStatus::Empty);
    assert_eq!(second.records_collected, 0);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1, "no second upstream call");

    // The short-circuit still wrote a collection log.
    let log_id = second.log_id.expect("empty runs are logged");
    let status: String =
        sqlx::query_scalar("SELECT status::text FROM collection_logs WHERE log_id = $1")
            .bind(log_id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(status, "empty");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn failed_attempts_retry_then_succeed() {
    let h = harness(2).await;
    let job_id = unique("retry_ok");
    let mut j = job(&job_id, &unique("AAPL"), TriggerType::Interval,
        serde_json::json!({"hours": 1}));
    j.retry_delay_seconds = 1;
    j.insert(&h.pool).await.unwrap();

    h.scheduler.startup().await.unwrap();
    assert_eq!(h.scheduler.trigger_now(&job_id).await.unwrap(),
        platform_core::scheduler::TriggerOutcome::Started);

    let pool = h.pool.clone();
    let done = wait_for(
        || {
            let pool = pool.clone();
            let job_id = job_id.clone();
            async move {
                platform_core::scheduler::JobExecution::list_for_job(&pool, &job_id, 10)
                    .await
                    .unwrap()
                    .iter()
                    .any(|e| e.execution_status == ExecutionStatus::Completed)
            }
        },
        Duration::from_secs(15),
    )
    .await;
    assert!(done, "third attempt should complete");

    let executions =
        platform_core::scheduler::JobExecution::list_for_job(&h.pool, &job_id, 10)
            .await
            .unwrap();
    assert_eq!(executions.len(), 3);
    // Newest first: completed attempt 3, then two retrying attempts.
    assert_eq!(executions[0].execution_status, ExecutionStatus::Completed);
    assert_eq!(executions[0].attempt, 3);
    assert_eq!(executions[1].execution_status, ExecutionStatus::Retrying);
    assert_eq!(executions[2].execution_status, ExecutionStatus::Retrying);
    assert_eq!(executions[2].error_category.as_deref(), Some("api"));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn exhausted_retries_keep_a_recurring_job_active() {
    let h = harness(usize::MAX).await;
    let job_id = unique("retry_exhausted");
    let mut j = job(&job_id, &unique("AAPL"), TriggerType::Interval,
        serde_json::json!({"hours": 1}));
    j.retry_delay_seconds = 0;
    j.insert(&h.pool).await.unwrap();

    h.scheduler.startup().await.unwrap();
    h.scheduler.trigger_now(&job_id).await.unwrap();

    let pool = h.pool.clone();
    let finished = wait_for(
        || {
            let pool = pool.clone();
            let job_id = job_id.clone();
            async move {
                platform_core::scheduler::JobExecution::list_for_job(&pool, &job_id, 10)
                    .await
                    .unwrap()
                    .iter()
                    .any(|e| e.execution_status == ExecutionStatus::Failed)
            }
        },
        Duration::from_secs(15),
    )
    .await;
    assert!(finished, "final attempt should fail");

    // max_retries=3 means 4 attempts: three retrying, one failed.
    let executions =
        platform_core::scheduler::JobExecution::list_for_job(&h.pool, &job_id, 10)
            .await
            .unwrap();
    assert_eq!(executions.len(), 4);
    assert_eq!(executions[0].execution_status, ExecutionStatus::Failed);

    // The recurring trigger keeps the job alive past the failure window.
    let updated = ScheduledJob::find_by_id(&h.pool, &job_id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Active);
    assert!(updated.next_run_at.unwrap() > Utc::now());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn unknown_asset_type_fails_without_raising() {
    let h = harness(0).await;
    let request = IngestRequest {
        symbol: unique("X"),
        asset_type: "martian".to_string(),
        start: None,
        end: None,
        collector_kwargs: None,
        asset_metadata: None,
    };
    let cancel = tokio_util::sync::CancellationToken::new();
    let outcome = h.engine.ingest(&request, &cancel).await;

    assert_eq!(outcome.status, IngestStatus::Failed);
    assert_eq!(outcome.error_category, Some(ErrorCategory::Validation));
    assert_eq!(outcome.collector_type, "Unknown");
    assert!(outcome.log_id.is_some(), "failure is recorded in the log");
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn abandoned_executions_are_recovered_on_startup() {
    let h = harness(0).await;
    let job_id = unique("recovery");
    job(&job_id, &unique("AAPL"), TriggerType::Interval,
        serde_json::json!({"hours": 1}))
        .insert(&h.pool)
        .await
        .unwrap();

    // A `running` execution from an hour ago, far past the 30s timeout.
    sqlx::query(
        r#"
        INSERT INTO job_executions (job_id, execution_status, started_at, attempt)
        VALUES ($1, 'running', NOW() - INTERVAL '1 hour', 1)
        "#,
    )
    .bind(&job_id)
    .execute(&h.pool)
    .await
    .unwrap();

    h.scheduler.startup().await.unwrap();

    let executions =
        platform_core::scheduler::JobExecution::list_for_job(&h.pool, &job_id, 10)
            .await
            .unwrap();
    assert_eq!(executions[0].execution_status, ExecutionStatus::Failed);
    assert!(executions[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("abandoned"));

    // The parent job was rescheduled.
    let parent = ScheduledJob::find_by_id(&h.pool, &job_id).await.unwrap().unwrap();
    assert_eq!(parent.status, JobStatus::Active);
    assert!(parent.next_run_at.is_some());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn bounded_interval_job_completes_after_its_end_date() {
    let h = harness(0).await;
    let job_id = unique("one_shot");
    let mut j = job(&job_id, &unique("AAPL"), TriggerType::Interval,
        serde_json::json!({"seconds": 1}));
    // One more fire fits before the end date, none after.
    j.end_date = Some(Utc::now() + ChronoDuration::seconds(2));
    j.insert(&h.pool).await.unwrap();

    h.scheduler.startup().await.unwrap();
    let runner = h.scheduler.clone();
    let loop_handle = tokio::spawn(async move { runner.run().await });

    let pool = h.pool.clone();
    let completed = wait_for(
        || {
            let pool = pool.clone();
            let job_id = job_id.clone();
            async move {
                ScheduledJob::find_by_id(&pool, &job_id)
                    .await
                    .unwrap()
                    .is_some_and(|j| j.status == JobStatus::Completed)
            }
        },
        Duration::from_secs(15),
    )
    .await;
    assert!(completed, "job should reach completed once the trigger is exhausted");

    let finished = ScheduledJob::find_by_id(&h.pool, &job_id).await.unwrap().unwrap();
    assert_eq!(finished.next_run_at, None);

    h.scheduler.begin_shutdown();
    let _ = loop_handle.await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
async fn http_api_creates_and_serves_jobs() {
    let h = harness(0).await;

    let state = platform_core::server::AppState {
        db_pool: h.pool.clone(),
        scheduler: h.scheduler.clone(),
        registry: Arc::new(CollectorRegistry::empty()),
        metrics: Arc::new(SchedulerMetrics::new()),
        events: EventHub::new(),
        defaults: Arc::new(test_config()),
    };
    let app = platform_core::server::build_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum_serve(listener, app));

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    // Unknown asset type is a 400 with the error envelope.
    let response = client
        .post(format!("{base}/api/scheduler/jobs"))
        .json(&serde_json::json!({
            "symbol": "X",
            "asset_type": "martian",
            "trigger_type": "cron",
            "trigger_config": {"hour": "9"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation_error");

    // A valid job lands as 201 pending.
    let job_id = unique("api_job");
    let response = client
        .post(format!("{base}/api/scheduler/jobs"))
        .json(&serde_json::json!({
            "symbol": "AAPL",
            "asset_type": "stock",
            "trigger_type": "cron",
            "trigger_config": {"hour": "9", "minute": "30"},
            "job_id": job_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Duplicate job_id conflicts.
    let response = client
        .post(format!("{base}/api/scheduler/jobs"))
        .json(&serde_json::json!({
            "symbol": "AAPL",
            "asset_type": "stock",
            "trigger_type": "cron",
            "trigger_config": {"hour": "9"},
            "job_id": job_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Fetch, pause, resume, delete.
    let response = client
        .get(format!("{base}/api/scheduler/jobs/{job_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{base}/api/scheduler/jobs/{job_id}/pause"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let paused: serde_json::Value = response.json().await.unwrap();
    assert_eq!(paused["status"], "paused");
    assert!(paused["next_run_at"].is_null());

    let response = client
        .delete(format!("{base}/api/scheduler/jobs/{job_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{base}/api/scheduler/jobs/{job_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Metrics exposition is served.
    let response = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

async fn axum_serve(listener: tokio::net::TcpListener, app: axum::Router) {
    axum::serve(listener, app).await.unwrap();
}

fn test_config() -> platform_core::Config {
    platform_core::Config {
        db_host: "localhost".into(),
        db_port: 5432,
        db_name: "test".into(),
        db_user: "postgres".into(),
        db_password: "postgres".into(),
        api_host: "127.0.0.1".into(),
        api_port: 0,
        api_workers: 2,
        fred_api_key: None,
        coinbase_api_key: None,
        coinbase_api_secret: None,
        default_timeout: Duration::from_secs(30),
        default_max_retries: 3,
        rate_limit_calls: 100,
        rate_limit_period: Duration::from_secs(60),
        scheduler_workers: 4,
    }
}
