//! Crypto collector backed by Coinbase Exchange daily candles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feeds::coinbase::CoinbaseClient;
use feeds::FeedError;

use super::{
    frame::Frame, reject_unknown_kwargs, validate_symbol, Collector, CollectorMetadata, Kwargs,
    SymbolMatch,
};
use crate::common::AssetType;

const ALLOWED_KWARGS: &[&str] = &["quote"];

pub struct CryptoCollector {
    client: CoinbaseClient,
}

impl Default for CryptoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoCollector {
    pub fn new() -> Self {
        Self {
            client: CoinbaseClient::new(),
        }
    }

    /// `BTC-USD` passes through; a bare base currency gets the `quote`
    /// kwarg (default `USD`) attached.
    fn product_id(symbol: &str, kwargs: &Kwargs) -> String {
        if symbol.contains('-') {
            return symbol.to_uppercase();
        }
        let quote = kwargs
            .get("quote")
            .and_then(|v| v.as_str())
            .unwrap_or("USD");
        format!("{}-{}", symbol.to_uppercase(), quote.to_uppercase())
    }
}

#[async_trait]
impl Collector for CryptoCollector {
    fn name(&self) -> &'static str {
        "CryptoCollector"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Crypto
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type(),
            source: "coinbase",
            requires_credentials: false,
            credentials_configured: true,
            description: "Daily OHLCV candles from Coinbase Exchange market data",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({
            "quote": "Quote currency attached to bare base symbols (default: 'USD')",
        })
    }

    fn validate_params(&self, symbol: &str, kwargs: &Kwargs) -> Result<(), FeedError> {
        validate_symbol(symbol)?;
        reject_unknown_kwargs(kwargs, ALLOWED_KWARGS)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, FeedError> {
        let query = query.to_uppercase();
        let products = self.client.products().await?;
        Ok(products
            .into_iter()
            .filter(|p| p.id.contains(&query) || p.base_currency.contains(&query))
            .take(limit)
            .map(|p| SymbolMatch {
                name: format!("{} / {}", p.base_currency, p.quote_currency),
                symbol: p.id,
            })
            .collect())
    }

    async fn collect(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &Kwargs,
    ) -> Result<Frame, FeedError> {
        self.validate_params(symbol, kwargs)?;
        let candles = self
            .client
            .daily_candles(&Self::product_id(symbol, kwargs), start, end)
            .await?;
        Ok(Frame::from_bars(candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_id_passes_through_dashed_form() {
        assert_eq!(
            CryptoCollector::product_id("btc-usd", &Kwargs::new()),
            "BTC-USD"
        );
    }

    #[test]
    fn bare_symbol_gets_default_quote() {
        assert_eq!(CryptoCollector::product_id("ETH", &Kwargs::new()), "ETH-USD");
    }

    #[test]
    fn quote_kwarg_overrides_default() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("quote".to_string(), serde_json::json!("eur"));
        assert_eq!(CryptoCollector::product_id("BTC", &kwargs), "BTC-EUR");
    }
}
