//! Application assembly: shared state and the axum router.

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::collectors::CollectorRegistry;
use crate::config::Config;
use crate::metrics::SchedulerMetrics;
use crate::scheduler::{EventHub, PersistentScheduler};

use super::routes::{collectors, health, ingestion, jobs, ws};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub scheduler: Arc<PersistentScheduler>,
    pub registry: Arc<CollectorRegistry>,
    pub metrics: Arc<SchedulerMetrics>,
    pub events: EventHub,
    pub defaults: Arc<Config>,
}

/// Build the router.
///
/// REST endpoints live under `/api`; `/health`, `/metrics`, and the
/// `/ws/scheduler` push channel sit at the root, matching what deployment
/// probes and Prometheus scrapers expect.
pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/scheduler/jobs",
            post(jobs::create_job).get(jobs::list_jobs),
        )
        .route(
            "/scheduler/jobs/:job_id",
            get(jobs::get_job)
                .patch(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/scheduler/jobs/:job_id/trigger", post(jobs::trigger_job))
        .route("/scheduler/jobs/:job_id/pause", post(jobs::pause_job))
        .route("/scheduler/jobs/:job_id/resume", post(jobs::resume_job))
        .route(
            "/scheduler/jobs/:job_id/executions",
            get(jobs::list_executions),
        )
        .route("/ingestion/logs", get(ingestion::list_logs))
        .route("/collectors/metadata", get(collectors::collector_metadata))
        .route(
            "/collectors/:asset_type/options",
            get(collectors::collector_options),
        )
        .route(
            "/collectors/:asset_type/search",
            get(collectors::search_symbols),
        )
        .route("/collectors/validate", post(collectors::validate_params));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .nest("/api", api)
        .route("/health", get(health::health_handler))
        .route("/metrics", get(health::metrics_handler))
        .route("/ws/scheduler", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
