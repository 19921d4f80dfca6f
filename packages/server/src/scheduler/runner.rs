//! The persistent scheduler: tick loop, worker pool, retries, recovery.
//!
//! Single-leader model: one scheduler process owns the durable job state.
//! The tick loop itself never performs network I/O — it adopts pending jobs,
//! pulls due ones, and hands them to a bounded pool of worker tasks. An
//! in-memory in-flight set guarantees at most one concurrent execution per
//! job id; retry waits happen inside the worker while it still holds that
//! slot, so a retrying job can never overlap itself.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::common::ErrorCategory;
use crate::ingestion::{IngestRequest, IngestionEngine};
use crate::metrics::SchedulerMetrics;

use super::events::{EventHub, SchedulerEvent};
use super::execution::{ExecutionStatus, JobExecution};
use super::job::{JobStatus, ScheduledJob};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick granularity; at most one second per the durability contract.
    pub tick_interval: Duration,
    /// Bounded worker pool size.
    pub worker_count: usize,
    /// How long shutdown waits for in-flight workers before abandoning them.
    pub shutdown_grace: Duration,
    /// Collector deadline; also the threshold for restart recovery.
    pub collect_timeout: Duration,
    /// Wall-clock timezone for cron evaluation.
    pub timezone: Tz,
    /// Max due jobs dispatched per tick.
    pub dispatch_batch: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            worker_count: 8,
            shutdown_grace: Duration::from_secs(30),
            collect_timeout: Duration::from_secs(300),
            timezone: chrono_tz::UTC,
            dispatch_batch: 100,
        }
    }
}

/// Result of a manual trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    NotFound,
}

/// Releases the job's in-flight slot when the worker finishes, panics
/// included.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

#[derive(Clone)]
pub struct PersistentScheduler {
    pool: PgPool,
    engine: Arc<IngestionEngine>,
    events: EventHub,
    metrics: Arc<SchedulerMetrics>,
    config: Arc<SchedulerConfig>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl PersistentScheduler {
    pub fn new(
        pool: PgPool,
        engine: Arc<IngestionEngine>,
        events: EventHub,
        metrics: Arc<SchedulerMetrics>,
        config: SchedulerConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            pool,
            engine,
            events,
            metrics,
            config: Arc::new(config),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            workers,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Restart recovery plus adoption of every job the scheduler owns.
    pub async fn startup(&self) -> Result<()> {
        let recovered =
            JobExecution::recover_abandoned(&self.pool, self.config.collect_timeout).await?;
        if recovered > 0 {
            warn!(count = recovered, "finalized executions abandoned by a previous run");
        }

        let jobs = ScheduledJob::load_for_startup(&self.pool).await?;
        let mut adopted = 0usize;
        for job in &jobs {
            if job.status == JobStatus::Paused {
                continue;
            }
            self.activate_job(job).await;
            adopted += 1;
        }
        info!(total = jobs.len(), adopted, "scheduler state loaded");
        Ok(())
    }

    /// Main loop. Returns after `begin_shutdown` (or cancelling the token
    /// returned by `shutdown_token`) once in-flight workers drained or the
    /// grace period expired.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            workers = self.config.worker_count,
            timezone = %self.config.timezone,
            "scheduler loop started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed");
            }
        }

        self.drain().await;
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting tick work; `run` drains and returns.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn drain(&self) {
        self.tracker.close();
        info!(grace_secs = self.config.shutdown_grace.as_secs(), "waiting for in-flight workers");
        if tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            // Abandoned executions stay `running`; restart recovery
            // finalizes them.
            warn!("grace period expired, abandoning in-flight executions");
        }
    }

    /// One pass: adopt pending jobs, dispatch due ones, refresh gauges.
    async fn tick(&self) -> Result<()> {
        let pending = ScheduledJob::pending(&self.pool).await?;
        for job in &pending {
            self.activate_job(job).await;
        }

        let due = ScheduledJob::due(&self.pool, self.config.dispatch_batch).await?;
        for job in due {
            self.spawn_job(job, false);
        }

        // Gauges are only ever written from the tick loop.
        let counts = ScheduledJob::status_counts(&self.pool).await?;
        self.metrics.set_job_gauges(&counts);
        Ok(())
    }

    /// Compute and persist a job's next fire time, promoting it to active
    /// (or straight to completed when the trigger is already exhausted).
    async fn activate_job(&self, job: &ScheduledJob) {
        let now = Utc::now();
        let trigger = match job.trigger() {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "stored trigger_config does not parse");
                if let Err(e) =
                    ScheduledJob::set_schedule(&self.pool, &job.job_id, JobStatus::Failed, None)
                        .await
                {
                    error!(job_id = %job.job_id, error = %e, "failed to mark job failed");
                }
                return;
            }
        };

        let next_run_at = match job.next_run_at {
            // A stored future fire time survives restarts; a stale one fires
            // immediately (at-least-once).
            Some(stored) => Some(stored.max(now)),
            None if trigger.execute_now() && job.last_run_at.is_none() => Some(now),
            None => trigger.next_fire(
                now - chrono::Duration::seconds(1),
                &job.fire_bounds(),
                self.config.timezone,
            ),
        };

        let (status, next_run_at) = match next_run_at {
            Some(next) => (JobStatus::Active, Some(next)),
            None => (JobStatus::Completed, None),
        };

        if let Err(e) =
            ScheduledJob::set_schedule(&self.pool, &job.job_id, status, next_run_at).await
        {
            error!(job_id = %job.job_id, error = %e, "failed to persist activation");
            return;
        }

        debug!(job_id = %job.job_id, status = status.as_str(), next_run_at = ?next_run_at, "job adopted");
        self.events.publish(SchedulerEvent::JobUpdate {
            job_id: job.job_id.clone(),
            status,
            timestamp: now,
            next_run_at,
            records_collected: None,
            error: None,
        });
    }

    /// Hand a job to the worker pool unless it is already in flight.
    fn spawn_job(&self, job: ScheduledJob, manual: bool) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(job.job_id.clone()) {
                debug!(job_id = %job.job_id, "already in flight, skipping this tick");
                return;
            }
        }

        let this = self.clone();
        self.tracker.spawn(async move {
            let _guard = InFlightGuard {
                set: this.in_flight.clone(),
                job_id: job.job_id.clone(),
            };
            let Ok(_permit) = this.workers.clone().acquire_owned().await else {
                return;
            };
            if manual {
                debug!(job_id = %job.job_id, "manual trigger");
            }
            this.run_job(job).await;
        });
    }

    /// Execute one job to completion, including retries. Runs inside a
    /// worker task while the job's in-flight slot is held.
    async fn run_job(&self, job: ScheduledJob) {
        let cancel = &self.shutdown;
        let asset_type = job.asset_type;
        let tz = self.config.timezone;

        let trigger = match job.trigger() {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "trigger_config does not parse, failing job");
                let _ = ScheduledJob::set_schedule(&self.pool, &job.job_id, JobStatus::Failed, None)
                    .await;
                return;
            }
        };

        let max_attempts = job.max_retries.max(0) + 1;
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let execution_id =
                match JobExecution::insert_running(&self.pool, &job.job_id, attempt).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!(job_id = %job.job_id, error = %e, "failed to insert execution row");
                        return;
                    }
                };
            self.events.publish(SchedulerEvent::ExecutionStarted {
                job_id: job.job_id.clone(),
                execution_id,
                attempt,
                timestamp: Utc::now(),
            });

            // Date windows are resolved inside the engine at call time;
            // jobs without fixed dates get a fresh trailing-day window on
            // every fire.
            let request = IngestRequest {
                symbol: job.symbol.clone(),
                asset_type: asset_type.as_str().to_string(),
                start: job.start_date,
                end: job.end_date,
                collector_kwargs: job.collector_kwargs.clone(),
                asset_metadata: job.asset_metadata.clone(),
            };
            let outcome = self.engine.ingest(&request, cancel).await;

            if cancel.is_cancelled() {
                // Shutdown mid-run: the execution row stays `running` and is
                // finalized by restart recovery.
                return;
            }

            let duration_secs = outcome.execution_time_ms as f64 / 1000.0;

            if !outcome.is_failure() {
                let now = Utc::now();
                // A manually triggered paused job runs but stays paused.
                let (status, next_run_at) = if job.status == JobStatus::Paused {
                    (JobStatus::Paused, None)
                } else {
                    match trigger.next_fire(now, &job.fire_bounds(), tz) {
                        Some(next) => (JobStatus::Active, Some(next)),
                        None => (JobStatus::Completed, None),
                    }
                };

                // Execution terminal state and job schedule advance together.
                let result: Result<(), sqlx::Error> = async {
                    let mut tx = self.pool.begin().await?;
                    JobExecution::finalize(
                        &mut *tx,
                        execution_id,
                        ExecutionStatus::Completed,
                        outcome.log_id,
                        None,
                        None,
                        outcome.execution_time_ms,
                    )
                    .await?;
                    ScheduledJob::complete_run(&mut *tx, &job.job_id, now, status, next_run_at)
                        .await?;
                    tx.commit().await
                }
                .await;
                if let Err(e) = result {
                    error!(job_id = %job.job_id, error = %e, "failed to persist successful run");
                }

                self.metrics.record_execution(
                    asset_type.as_str(),
                    "completed",
                    duration_secs,
                    None,
                );
                self.events.publish(SchedulerEvent::ExecutionFinished {
                    job_id: job.job_id.clone(),
                    execution_id,
                    attempt,
                    succeeded: true,
                    will_retry: false,
                    timestamp: now,
                });
                self.events.publish(SchedulerEvent::JobUpdate {
                    job_id: job.job_id.clone(),
                    status,
                    timestamp: now,
                    next_run_at,
                    records_collected: Some(outcome.records_collected),
                    error: None,
                });
                debug!(
                    job_id = %job.job_id,
                    records = outcome.records_collected,
                    next_run_at = ?next_run_at,
                    "run completed"
                );
                return;
            }

            let category = outcome.error_category.unwrap_or(ErrorCategory::Unknown);
            let message = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());

            if category.is_retriable() && attempt < max_attempts {
                let delay = job.retry_delay(attempt);
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));

                if let Err(e) = JobExecution::finalize(
                    &self.pool,
                    execution_id,
                    ExecutionStatus::Retrying,
                    outcome.log_id,
                    Some(&message),
                    Some(category),
                    outcome.execution_time_ms,
                )
                .await
                {
                    error!(job_id = %job.job_id, error = %e, "failed to persist retrying execution");
                }
                // The durable fire time tracks the retry so a restart does
                // not lose it; the in-flight slot keeps the tick loop from
                // double-firing meanwhile. Manually run paused jobs keep
                // their paused schedule.
                if job.status != JobStatus::Paused {
                    if let Err(e) = ScheduledJob::set_schedule(
                        &self.pool,
                        &job.job_id,
                        JobStatus::Active,
                        Some(retry_at),
                    )
                    .await
                    {
                        error!(job_id = %job.job_id, error = %e, "failed to persist retry time");
                    }
                }

                self.metrics.record_execution(
                    asset_type.as_str(),
                    "retrying",
                    duration_secs,
                    Some(category),
                );
                self.metrics.record_retry(&job.job_id, asset_type);
                self.events.publish(SchedulerEvent::ExecutionFinished {
                    job_id: job.job_id.clone(),
                    execution_id,
                    attempt,
                    succeeded: false,
                    will_retry: true,
                    timestamp: Utc::now(),
                });
                warn!(
                    job_id = %job.job_id,
                    attempt,
                    category = %category,
                    delay_secs = delay.as_secs_f64(),
                    "attempt failed, retrying: {message}"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }
                attempt += 1;
                continue;
            }

            // Final failure: retries exhausted or the category is permanent.
            if let Err(e) = JobExecution::finalize(
                &self.pool,
                execution_id,
                ExecutionStatus::Failed,
                outcome.log_id,
                Some(&message),
                Some(category),
                outcome.execution_time_ms,
            )
            .await
            {
                error!(job_id = %job.job_id, error = %e, "failed to persist failed execution");
            }

            let now = Utc::now();
            // Failures do not block future runs: a recurring trigger keeps
            // the job active at its next scheduled fire. Only a one-shot
            // trigger (no next fire) fails the job.
            let (status, next_run_at) = if job.status == JobStatus::Paused {
                (JobStatus::Paused, None)
            } else {
                match trigger.next_fire(now, &job.fire_bounds(), tz) {
                    Some(next) => (JobStatus::Active, Some(next)),
                    None => (JobStatus::Failed, None),
                }
            };
            if let Err(e) =
                ScheduledJob::set_schedule(&self.pool, &job.job_id, status, next_run_at).await
            {
                error!(job_id = %job.job_id, error = %e, "failed to persist post-failure schedule");
            }

            self.metrics.record_execution(
                asset_type.as_str(),
                "failed",
                duration_secs,
                Some(category),
            );
            self.events.publish(SchedulerEvent::ExecutionFinished {
                job_id: job.job_id.clone(),
                execution_id,
                attempt,
                succeeded: false,
                will_retry: false,
                timestamp: now,
            });
            self.events.publish(SchedulerEvent::JobUpdate {
                job_id: job.job_id.clone(),
                status,
                timestamp: now,
                next_run_at,
                records_collected: None,
                error: Some(message.clone()),
            });
            warn!(
                job_id = %job.job_id,
                attempt,
                category = %category,
                status = status.as_str(),
                "run failed permanently: {message}"
            );
            return;
        }
    }

    /// Fire a job immediately, bypassing `next_run_at` but honoring the
    /// in-flight exclusion.
    pub async fn trigger_now(&self, job_id: &str) -> Result<TriggerOutcome> {
        let Some(job) = ScheduledJob::find_by_id(&self.pool, job_id).await? else {
            return Ok(TriggerOutcome::NotFound);
        };

        {
            let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.contains(job_id) {
                return Ok(TriggerOutcome::AlreadyRunning);
            }
        }

        info!(job_id = %job.job_id, "manual trigger accepted");
        self.spawn_job(job, true);
        Ok(TriggerOutcome::Started)
    }

    /// Pause: no further fires until resumed; `next_run_at` is cleared.
    pub async fn pause(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        let Some(_) = ScheduledJob::find_by_id(&self.pool, job_id).await? else {
            return Ok(None);
        };
        ScheduledJob::set_schedule(&self.pool, job_id, JobStatus::Paused, None).await?;
        self.events
            .publish(SchedulerEvent::job_update(job_id, JobStatus::Paused));
        info!(job_id, "job paused");
        ScheduledJob::find_by_id(&self.pool, job_id).await.map_err(Into::into)
    }

    /// Resume: recompute `next_run_at` from now. Missed fires are skipped,
    /// not caught up.
    pub async fn resume(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        let Some(job) = ScheduledJob::find_by_id(&self.pool, job_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let next = job
            .trigger()
            .ok()
            .and_then(|t| t.next_fire(now, &job.fire_bounds(), self.config.timezone));
        let (status, next_run_at) = match next {
            Some(next) => (JobStatus::Active, Some(next)),
            None => (JobStatus::Completed, None),
        };
        ScheduledJob::set_schedule(&self.pool, job_id, status, next_run_at).await?;
        self.events.publish(SchedulerEvent::JobUpdate {
            job_id: job_id.to_string(),
            status,
            timestamp: now,
            next_run_at,
            records_collected: None,
            error: None,
        });
        info!(job_id, status = status.as_str(), "job resumed");
        ScheduledJob::find_by_id(&self.pool, job_id).await.map_err(Into::into)
    }
}
