//! Per-asset-type data collectors.
//!
//! The collector set is closed: one collector per [`AssetType`], dispatched
//! by a match in [`CollectorRegistry`]. Each collector knows how to validate
//! parameters, search for symbols, describe itself, and fetch a time window
//! of observations from its upstream as a [`Frame`].
//!
//! Upstream quota discipline lives in [`rate_limiter`]; the ingestion engine
//! acquires a slot on the collector's shared limiter before calling
//! [`Collector::collect`].

mod bond;
mod commodity;
mod crypto;
mod economic;
mod forex;
pub mod frame;
pub mod rate_limiter;
mod stock;

pub use bond::BondCollector;
pub use commodity::CommodityCollector;
pub use crypto::CryptoCollector;
pub use economic::EconomicCollector;
pub use forex::ForexCollector;
pub use frame::{Frame, FrameRow};
pub use rate_limiter::{RateLimiterRegistry, SharedRateLimiter};
pub use stock::StockCollector;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feeds::FeedError;
use serde::Serialize;

use crate::common::AssetType;
use crate::config::Config;

/// Collector kwargs as they arrive from job definitions and API calls.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Descriptor returned by `GET /api/collectors/metadata`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorMetadata {
    pub name: &'static str,
    pub asset_type: AssetType,
    pub source: &'static str,
    pub requires_credentials: bool,
    pub credentials_configured: bool,
    pub description: &'static str,
}

/// One hit from a symbol search.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: String,
}

/// Capability surface of a collector.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Class name used as the shared rate limiter key, e.g. `StockCollector`.
    fn name(&self) -> &'static str;

    fn asset_type(&self) -> AssetType;

    fn metadata(&self) -> CollectorMetadata;

    /// Collector-specific kwargs the caller may pass, as a JSON document of
    /// `option name -> description`.
    fn options(&self) -> serde_json::Value;

    /// Per-collector override of the collect deadline; `None` means the
    /// platform default (`DEFAULT_TIMEOUT`).
    fn collect_timeout(&self) -> Option<std::time::Duration> {
        None
    }

    /// Cheap, offline validation of a symbol and kwargs.
    fn validate_params(&self, symbol: &str, kwargs: &Kwargs) -> Result<(), FeedError>;

    /// Search the upstream (or a curated list) for symbols.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, FeedError>;

    /// Fetch observations for `[start, end]`.
    async fn collect(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &Kwargs,
    ) -> Result<Frame, FeedError>;
}

/// The closed collector set, keyed by asset type.
pub struct CollectorRegistry {
    collectors: HashMap<AssetType, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    /// Build the production set from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StockCollector::new()));
        registry.register(Arc::new(ForexCollector::new()));
        registry.register(Arc::new(CryptoCollector::new()));
        registry.register(Arc::new(CommodityCollector::new()));
        registry.register(Arc::new(BondCollector::new(config.fred_api_key.clone())));
        registry.register(Arc::new(EconomicCollector::new(config.fred_api_key.clone())));
        registry
    }

    /// An empty registry; tests register stubs into it.
    pub fn empty() -> Self {
        Self {
            collectors: HashMap::new(),
        }
    }

    /// Register (or replace) the collector for its asset type.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.insert(collector.asset_type(), collector);
    }

    pub fn get(&self, asset_type: AssetType) -> Option<Arc<dyn Collector>> {
        self.collectors.get(&asset_type).cloned()
    }

    /// Lookup by the wire string; `None` for unknown asset types.
    pub fn get_by_name(&self, raw: &str) -> Option<Arc<dyn Collector>> {
        AssetType::parse(raw).and_then(|t| self.get(t))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.values()
    }
}

/// Symbol sanity checks shared by all collectors.
pub(crate) fn validate_symbol(symbol: &str) -> Result<(), FeedError> {
    if symbol.is_empty() {
        return Err(FeedError::Validation("symbol must not be empty".to_string()));
    }
    if symbol.len() > 100 {
        return Err(FeedError::Validation(
            "symbol must be at most 100 characters".to_string(),
        ));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | '^' | '='))
    {
        return Err(FeedError::Validation(format!(
            "symbol '{symbol}' contains unsupported characters"
        )));
    }
    Ok(())
}

/// Reject kwargs keys a collector does not understand.
pub(crate) fn reject_unknown_kwargs(kwargs: &Kwargs, allowed: &[&str]) -> Result<(), FeedError> {
    for key in kwargs.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(FeedError::Validation(format!(
                "unknown collector option '{key}' (supported: {})",
                allowed.join(", ")
            )));
        }
    }
    Ok(())
}

/// Filter a curated `(symbol, name)` list by a case-insensitive query.
pub(crate) fn search_curated(
    entries: &[(&str, &str)],
    query: &str,
    limit: usize,
) -> Vec<SymbolMatch> {
    let query = query.to_lowercase();
    entries
        .iter()
        .filter(|(symbol, name)| {
            symbol.to_lowercase().contains(&query) || name.to_lowercase().contains(&query)
        })
        .take(limit)
        .map(|(symbol, name)| SymbolMatch {
            symbol: symbol.to_string(),
            name: name.to_string(),
        })
        .collect()
}
