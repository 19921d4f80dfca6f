//! API error envelope.
//!
//! Every error response has the shape `{"error": {"code", "message"}}`.
//! 4xx codes mean the caller got something wrong; 502 surfaces a synchronous
//! upstream collector failure; 500 is reserved for bugs and store outages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use feeds::FeedError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Duplicate(_) => "duplicate_job_id",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let message = match &self {
            // Store details stay in the logs, not in responses.
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Validation(message) => ApiError::Validation(message),
            FeedError::RateLimited(message) | FeedError::Api(message) => {
                ApiError::Upstream(message)
            }
            FeedError::Configuration(message) => ApiError::Internal(anyhow::anyhow!(message)),
        }
    }
}

/// Whether a sqlx error is a unique-constraint violation (duplicate key).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
