//! Stock collector backed by Stooq daily bars.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feeds::stooq::StooqClient;
use feeds::FeedError;

use super::{
    frame::Frame, reject_unknown_kwargs, search_curated, validate_symbol, Collector,
    CollectorMetadata, Kwargs, SymbolMatch,
};
use crate::common::AssetType;

const ALLOWED_KWARGS: &[&str] = &["market"];

/// Curated fallback list; Stooq has no symbol search API.
const CURATED: &[(&str, &str)] = &[
    ("AAPL", "Apple Inc."),
    ("MSFT", "Microsoft Corporation"),
    ("GOOGL", "Alphabet Inc."),
    ("AMZN", "Amazon.com Inc."),
    ("NVDA", "NVIDIA Corporation"),
    ("META", "Meta Platforms Inc."),
    ("TSLA", "Tesla Inc."),
    ("BRK-B", "Berkshire Hathaway Inc."),
    ("JPM", "JPMorgan Chase & Co."),
    ("V", "Visa Inc."),
    ("JNJ", "Johnson & Johnson"),
    ("WMT", "Walmart Inc."),
    ("XOM", "Exxon Mobil Corporation"),
    ("KO", "The Coca-Cola Company"),
    ("SPY", "SPDR S&P 500 ETF Trust"),
];

pub struct StockCollector {
    client: StooqClient,
}

impl Default for StockCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StockCollector {
    pub fn new() -> Self {
        Self {
            client: StooqClient::new(),
        }
    }

    /// Stooq wants a market suffix (`aapl.us`); bare tickers get the
    /// `market` kwarg (default `us`) appended.
    fn stooq_symbol(symbol: &str, kwargs: &Kwargs) -> String {
        if symbol.contains('.') {
            return symbol.to_lowercase();
        }
        let market = kwargs
            .get("market")
            .and_then(|v| v.as_str())
            .unwrap_or("us");
        format!("{}.{}", symbol.to_lowercase(), market.to_lowercase())
    }
}

#[async_trait]
impl Collector for StockCollector {
    fn name(&self) -> &'static str {
        "StockCollector"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Stock
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type(),
            source: "stooq",
            requires_credentials: false,
            credentials_configured: true,
            description: "Daily OHLCV bars for equities and ETFs",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({
            "market": "Exchange suffix appended to bare tickers (default: 'us')",
        })
    }

    fn validate_params(&self, symbol: &str, kwargs: &Kwargs) -> Result<(), FeedError> {
        validate_symbol(symbol)?;
        reject_unknown_kwargs(kwargs, ALLOWED_KWARGS)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, FeedError> {
        Ok(search_curated(CURATED, query, limit))
    }

    async fn collect(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &Kwargs,
    ) -> Result<Frame, FeedError> {
        self.validate_params(symbol, kwargs)?;
        let bars = self
            .client
            .daily_bars(&Self::stooq_symbol(symbol, kwargs), start, end)
            .await?;
        Ok(Frame::from_bars(bars))
    }
}
