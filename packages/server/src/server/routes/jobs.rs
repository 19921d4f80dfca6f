//! Scheduler job CRUD and lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::scheduler::{
    JobExecution, JobStatus, ScheduledJob, SchedulerEvent, TriggerOutcome,
};
use crate::server::app::AppState;
use crate::server::error::{is_unique_violation, ApiError, ApiResult};
use crate::server::models::{JobCreateRequest, JobUpdateRequest, TriggerResponse};

/// POST /api/scheduler/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<ScheduledJob>)> {
    let request: JobCreateRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid job definition: {e}")))?;
    let job = request.into_job(&state.defaults)?;

    let inserted = job.insert(&state.db_pool).await.map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Duplicate(format!("job_id '{}' already exists", job.job_id))
        } else {
            e.into()
        }
    })?;

    state
        .metrics
        .record_job_created(inserted.asset_type, inserted.status);
    state
        .events
        .publish(SchedulerEvent::job_update(&inserted.job_id, inserted.status));
    tracing::info!(job_id = %inserted.job_id, symbol = %inserted.symbol, "job created");

    // The scheduler adopts the pending job on its next tick.
    Ok((StatusCode::CREATED, Json(inserted)))
}

/// GET /api/scheduler/jobs
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<ScheduledJob>>> {
    Ok(Json(ScheduledJob::list_all(&state.db_pool).await?))
}

/// GET /api/scheduler/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ScheduledJob>> {
    ScheduledJob::find_by_id(&state.db_pool, &job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job '{job_id}' not found")))
}

/// PATCH /api/scheduler/jobs/{job_id}
pub async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<ScheduledJob>> {
    let request: JobUpdateRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid job update: {e}")))?;

    let mut job = ScheduledJob::find_by_id(&state.db_pool, &job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job '{job_id}' not found")))?;

    let schedule_changed = request.apply(&mut job)?;
    if matches!(job.status, JobStatus::Paused) {
        // Paused jobs carry no fire time.
        job.next_run_at = None;
    } else if schedule_changed {
        // Back to pending with no fire time; the scheduler re-adopts it and
        // recomputes next_run_at from the new schedule.
        job.status = JobStatus::Pending;
        job.next_run_at = None;
    }

    let updated = job.update(&state.db_pool).await?;
    state
        .events
        .publish(SchedulerEvent::job_update(&updated.job_id, updated.status));
    Ok(Json(updated))
}

/// DELETE /api/scheduler/jobs/{job_id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    if !ScheduledJob::delete(&state.db_pool, &job_id).await? {
        return Err(ApiError::NotFound(format!("job '{job_id}' not found")));
    }
    tracing::info!(job_id = %job_id, "job deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/scheduler/jobs/{job_id}/trigger
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TriggerResponse>> {
    match state.scheduler.trigger_now(&job_id).await? {
        TriggerOutcome::Started => Ok(Json(TriggerResponse {
            job_id,
            triggered: true,
            message: "execution started".to_string(),
        })),
        TriggerOutcome::AlreadyRunning => Ok(Json(TriggerResponse {
            job_id,
            triggered: false,
            message: "job already has an execution in flight".to_string(),
        })),
        TriggerOutcome::NotFound => {
            Err(ApiError::NotFound(format!("job '{job_id}' not found")))
        }
    }
}

/// POST /api/scheduler/jobs/{job_id}/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ScheduledJob>> {
    state
        .scheduler
        .pause(&job_id)
        .await
        .map_err(ApiError::Internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job '{job_id}' not found")))
}

/// POST /api/scheduler/jobs/{job_id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ScheduledJob>> {
    state
        .scheduler
        .resume(&job_id)
        .await
        .map_err(ApiError::Internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job '{job_id}' not found")))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_execution_limit")]
    pub limit: i64,
}

fn default_execution_limit() -> i64 {
    100
}

/// GET /api/scheduler/jobs/{job_id}/executions — newest first.
pub async fn list_executions(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Json<Vec<JobExecution>>> {
    if ScheduledJob::find_by_id(&state.db_pool, &job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("job '{job_id}' not found")));
    }
    let limit = query.limit.clamp(1, 1000);
    Ok(Json(
        JobExecution::list_for_job(&state.db_pool, &job_id, limit).await?,
    ))
}
