//! Prometheus metrics for the scheduler and API.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::common::{AssetType, ErrorCategory};
use crate::scheduler::JobStatus;

/// All platform metrics on one owned registry, served at `GET /metrics`.
pub struct SchedulerMetrics {
    registry: Registry,
    jobs_total: IntCounterVec,
    executions_total: IntCounterVec,
    retries_total: IntCounterVec,
    duration_seconds: HistogramVec,
    active_jobs: IntGaugeVec,
    pending_jobs: IntGaugeVec,
    failed_jobs: IntGaugeVec,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("scheduler_jobs_total", "Total number of scheduler jobs"),
            &["status", "asset_type"],
        )
        .expect("metric definition is static");

        let executions_total = IntCounterVec::new(
            Opts::new(
                "scheduler_job_executions_total",
                "Total number of job executions",
            ),
            &["status", "asset_type", "error_category"],
        )
        .expect("metric definition is static");

        let retries_total = IntCounterVec::new(
            Opts::new("scheduler_job_retries_total", "Total number of job retries"),
            &["job_id", "asset_type"],
        )
        .expect("metric definition is static");

        let duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "scheduler_job_duration_seconds",
                "Job execution duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["asset_type", "status"],
        )
        .expect("metric definition is static");

        let active_jobs = IntGaugeVec::new(
            Opts::new("scheduler_active_jobs", "Number of active scheduler jobs"),
            &["asset_type"],
        )
        .expect("metric definition is static");

        let pending_jobs = IntGaugeVec::new(
            Opts::new("scheduler_pending_jobs", "Number of pending scheduler jobs"),
            &["asset_type"],
        )
        .expect("metric definition is static");

        let failed_jobs = IntGaugeVec::new(
            Opts::new("scheduler_failed_jobs", "Number of failed scheduler jobs"),
            &["asset_type"],
        )
        .expect("metric definition is static");

        for collector in [
            Box::new(jobs_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(executions_total.clone()),
            Box::new(retries_total.clone()),
            Box::new(duration_seconds.clone()),
            Box::new(active_jobs.clone()),
            Box::new(pending_jobs.clone()),
            Box::new(failed_jobs.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            jobs_total,
            executions_total,
            retries_total,
            duration_seconds,
            active_jobs,
            pending_jobs,
            failed_jobs,
        }
    }

    pub fn record_job_created(&self, asset_type: AssetType, status: JobStatus) {
        self.jobs_total
            .with_label_values(&[status.as_str(), asset_type.as_str()])
            .inc();
    }

    pub fn record_execution(
        &self,
        asset_type: &str,
        status: &str,
        duration_secs: f64,
        error_category: Option<ErrorCategory>,
    ) {
        let category = error_category.map(|c| c.as_str()).unwrap_or("none");
        self.executions_total
            .with_label_values(&[status, asset_type, category])
            .inc();
        self.duration_seconds
            .with_label_values(&[asset_type, status])
            .observe(duration_secs);
    }

    pub fn record_retry(&self, job_id: &str, asset_type: AssetType) {
        self.retries_total
            .with_label_values(&[job_id, asset_type.as_str()])
            .inc();
    }

    /// Refresh the status gauges from a `(asset_type, status, count)`
    /// snapshot. Combinations missing from the snapshot are reset to zero.
    pub fn set_job_gauges(&self, counts: &[(AssetType, JobStatus, i64)]) {
        for asset_type in AssetType::ALL {
            let mut active = 0;
            let mut pending = 0;
            let mut failed = 0;
            for (t, status, count) in counts {
                if *t == asset_type {
                    match status {
                        JobStatus::Active => active = *count,
                        JobStatus::Pending => pending = *count,
                        JobStatus::Failed => failed = *count,
                        _ => {}
                    }
                }
            }
            self.active_jobs
                .with_label_values(&[asset_type.as_str()])
                .set(active);
            self.pending_jobs
                .with_label_values(&[asset_type.as_str()])
                .set(pending);
            self.failed_jobs
                .with_label_values(&[asset_type.as_str()])
                .set(failed);
        }
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
