//! HTTP API and push channel.

pub mod app;
pub mod error;
pub mod models;
pub mod routes;

pub use app::{build_app, AppState};
pub use error::{ApiError, ApiResult};
