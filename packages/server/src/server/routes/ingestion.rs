//! Collection log endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::ingestion::CollectionLog;
use crate::server::app::AppState;
use crate::server::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_logs_limit")]
    pub limit: i64,
}

fn default_logs_limit() -> i64 {
    50
}

/// GET /api/ingestion/logs?limit=N — newest first.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<CollectionLog>>> {
    let limit = query.limit.clamp(1, 500);
    Ok(Json(CollectionLog::recent(&state.db_pool, limit).await?))
}
