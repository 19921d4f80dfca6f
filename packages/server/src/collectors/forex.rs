//! Forex collector backed by Stooq daily pair quotes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feeds::stooq::StooqClient;
use feeds::FeedError;

use super::{
    frame::Frame, reject_unknown_kwargs, search_curated, validate_symbol, Collector,
    CollectorMetadata, Kwargs, SymbolMatch,
};
use crate::common::AssetType;

const CURATED: &[(&str, &str)] = &[
    ("EURUSD", "Euro / US Dollar"),
    ("GBPUSD", "British Pound / US Dollar"),
    ("USDJPY", "US Dollar / Japanese Yen"),
    ("USDCHF", "US Dollar / Swiss Franc"),
    ("AUDUSD", "Australian Dollar / US Dollar"),
    ("USDCAD", "US Dollar / Canadian Dollar"),
    ("NZDUSD", "New Zealand Dollar / US Dollar"),
    ("EURGBP", "Euro / British Pound"),
    ("EURJPY", "Euro / Japanese Yen"),
];

pub struct ForexCollector {
    client: StooqClient,
}

impl Default for ForexCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ForexCollector {
    pub fn new() -> Self {
        Self {
            client: StooqClient::new(),
        }
    }

    /// Accepts `EURUSD` or `EUR/USD`; Stooq wants the bare lowercase pair.
    fn pair_symbol(symbol: &str) -> Result<String, FeedError> {
        let bare: String = symbol.chars().filter(|&c| c != '/').collect();
        if bare.len() != 6 || !bare.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FeedError::Validation(format!(
                "'{symbol}' is not a currency pair (expected e.g. EURUSD or EUR/USD)"
            )));
        }
        Ok(bare.to_lowercase())
    }
}

#[async_trait]
impl Collector for ForexCollector {
    fn name(&self) -> &'static str {
        "ForexCollector"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Forex
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type(),
            source: "stooq",
            requires_credentials: false,
            credentials_configured: true,
            description: "Daily exchange rates for currency pairs",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn validate_params(&self, symbol: &str, kwargs: &Kwargs) -> Result<(), FeedError> {
        validate_symbol(symbol)?;
        Self::pair_symbol(symbol)?;
        reject_unknown_kwargs(kwargs, &[])
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
            .daily_bars(&Self::pair_symbol(symbol)?, start, end)
            .await?;
        // The canonical forex table stores a single rate; use the close.
        Ok(Frame::from_values(bars, "rate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_symbol_normalizes_slash_form() {
        assert_eq!(ForexCollector::pair_symbol("EUR/USD").unwrap(), "eurusd");
        assert_eq!(ForexCollector::pair_symbol("eurusd").unwrap(), "eurusd");
    }

    #[test]
    fn pair_symbol_rejects_non_pairs() {
        assert!(ForexCollector::pair_symbol("EUR").is_err());
        assert!(ForexCollector::pair_symbol("EURUSD1").is_err());
    }

    #[test]
    fn forex_takes_no_kwargs() {
        let collector = ForexCollector::new();
        let mut kwargs = Kwargs::new();
        kwargs.insert("market".to_string(), serde_json::json!("us"));
        assert!(collector.validate_params("EURUSD", &kwargs).is_err());
        assert!(collector.validate_params("EURUSD", &Kwargs::new()).is_ok());
    }
}
