//! Upstream market data clients.
//!
//! One module per source, each a thin reqwest wrapper that returns parsed
//! observations and maps HTTP failures onto the shared [`FeedError`]
//! taxonomy:
//!
//! - [`stooq`] — daily OHLCV bars as CSV (stocks, forex pairs, commodity
//!   futures). No credentials.
//! - [`fred`] — FRED observation series and series search (economic
//!   indicators, treasury yields). Requires an API key.
//! - [`coinbase`] — Coinbase Exchange daily candles and product listing
//!   (crypto). Public market data endpoints.
//!
//! Parsing is kept in pure functions so payload handling is testable without
//! a network.

pub mod coinbase;
pub mod fred;
pub mod stooq;

use chrono::{DateTime, Utc};

/// A single observation from an upstream source.
///
/// OHLC sources fill all four price fields; single-value sources (FRED)
/// fill only `close`.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub time: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Failure taxonomy shared by all feed clients.
///
/// The ingestion engine classifies these into retry categories, so the
/// variants matter more than the messages.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The upstream told us to slow down (HTTP 429 or equivalent).
    #[error("upstream rate limit: {0}")]
    RateLimited(String),

    /// Upstream HTTP/transport error, including 5xx and timeouts.
    #[error("upstream api error: {0}")]
    Api(String),

    /// The symbol or parameters were rejected by the upstream.
    #[error("invalid symbol or parameters: {0}")]
    Validation(String),

    /// Credentials required by the source are missing or malformed.
    #[error("missing or invalid credentials: {0}")]
    Configuration(String),
}

impl FeedError {
    /// Map an HTTP status from an upstream into a feed error.
    pub(crate) fn from_status(status: reqwest::StatusCode, source: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            FeedError::RateLimited(format!("{source} returned 429"))
        } else if status.is_client_error() {
            FeedError::Validation(format!("{source} rejected the request ({status})"))
        } else {
            FeedError::Api(format!("{source} returned {status}"))
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FeedError::from_status(status, "upstream");
        }
        FeedError::Api(err.to_string())
    }
}
