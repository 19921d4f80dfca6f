//! Market data scheduler platform.
//!
//! A persistent, Postgres-backed job scheduler for time-series market data
//! ingestion. Jobs collect data for a `(symbol, asset_type)` pair on a cron
//! or fixed-interval schedule; definitions, execution history, and
//! collection outcomes are durable, so the scheduler picks up where it left
//! off after a restart.
//!
//! Module map:
//! - [`collectors`] — per-asset-type collectors behind the [`collectors::Collector`]
//!   trait, plus the shared rate limiter registry
//! - [`ingestion`] — the end-to-end single-run pipeline: asset resolution,
//!   incremental narrowing, collection, schema mapping, loading
//! - [`scheduler`] — durable job registry, trigger evaluation, the tick
//!   loop, retries, and lifecycle events
//! - [`server`] — axum HTTP API, WebSocket push channel, metrics exposition
//! - [`metrics`] — Prometheus counters/histograms/gauges

pub mod collectors;
pub mod common;
pub mod config;
pub mod ingestion;
pub mod metrics;
pub mod scheduler;
pub mod server;

pub use config::Config;
