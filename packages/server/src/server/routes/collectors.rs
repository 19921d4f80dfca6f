//! Collector descriptor, search, and validation endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::collectors::{Kwargs, SymbolMatch};
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};
use crate::server::models::{ValidateRequest, ValidateResponse};

/// GET /api/collectors/metadata — descriptors for every collector.
pub async fn collector_metadata(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for collector in state.registry.iter() {
        let metadata = collector.metadata();
        let mut entry = serde_json::to_value(&metadata).unwrap_or_default();
        if let Some(object) = entry.as_object_mut() {
            object.insert(
                "rate_limit".to_string(),
                serde_json::json!({
                    "calls": state.defaults.rate_limit_calls,
                    "period_seconds": state.defaults.rate_limit_period.as_secs(),
                }),
            );
        }
        out.insert(metadata.asset_type.to_string(), entry);
    }
    Json(serde_json::Value::Object(out))
}

/// GET /api/collectors/{asset_type}/options
pub async fn collector_options(
    State(state): State<AppState>,
    Path(asset_type): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let collector = state
        .registry
        .get_by_name(&asset_type)
        .ok_or_else(|| ApiError::Validation(format!("unknown asset type '{asset_type}'")))?;
    Ok(Json(collector.options()))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    50
}

/// GET /api/collectors/{asset_type}/search?q=...&limit=N
pub async fn search_symbols(
    State(state): State<AppState>,
    Path(asset_type): Path<String>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<SymbolMatch>>> {
    if query.q.is_empty() {
        return Err(ApiError::Validation("query parameter 'q' must not be empty".to_string()));
    }
    let collector = state
        .registry
        .get_by_name(&asset_type)
        .ok_or_else(|| ApiError::Validation(format!("unknown asset type '{asset_type}'")))?;

    let limit = query.limit.clamp(1, 100);
    let matches = collector.search(&query.q, limit).await?;
    Ok(Json(matches))
}

/// POST /api/collectors/validate — always 200 with `{valid, errors}` for
/// well-formed requests; collector-level problems land in `errors`.
pub async fn validate_params(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<ValidateResponse>> {
    let request: ValidateRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid validate request: {e}")))?;

    let Some(collector) = state.registry.get_by_name(&request.asset_type) else {
        return Ok(Json(ValidateResponse {
            valid: false,
            errors: vec![format!("unknown asset type '{}'", request.asset_type)],
        }));
    };

    let kwargs: Kwargs = match request.collector_kwargs {
        None => Kwargs::new(),
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => {
            return Ok(Json(ValidateResponse {
                valid: false,
                errors: vec![format!("collector_kwargs must be an object, got {other}")],
            }));
        }
    };

    match collector.validate_params(&request.symbol, &kwargs) {
        Ok(()) => Ok(Json(ValidateResponse {
            valid: true,
            errors: Vec::new(),
        })),
        Err(e) => Ok(Json(ValidateResponse {
            valid: false,
            errors: vec![e.to_string()],
        })),
    }
}
