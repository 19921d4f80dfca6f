//! Economic indicator collector backed by FRED.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feeds::fred::FredClient;
use feeds::FeedError;

use super::{
    frame::Frame, reject_unknown_kwargs, validate_symbol, Collector, CollectorMetadata, Kwargs,
    SymbolMatch,
};
use crate::common::AssetType;

const ALLOWED_KWARGS: &[&str] = &["series_id"];

pub struct EconomicCollector {
    client: Option<FredClient>,
}

impl EconomicCollector {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: FredClient::new(api_key).ok(),
        }
    }

    fn client(&self) -> Result<&FredClient, FeedError> {
        self.client.as_ref().ok_or_else(|| {
            FeedError::Configuration("FRED_API_KEY environment variable is not set".to_string())
        })
    }

    /// The symbol is the FRED series id (`GDP`, `CPIAUCSL`, `UNRATE`);
    /// the `series_id` kwarg overrides it.
    fn series_id(symbol: &str, kwargs: &Kwargs) -> String {
        kwargs
            .get("series_id")
            .and_then(|v| v.as_str())
            .unwrap_or(symbol)
            .to_uppercase()
    }
}

#[async_trait]
impl Collector for EconomicCollector {
    fn name(&self) -> &'static str {
        "EconomicCollector"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::EconomicIndicator
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type(),
            source: "fred",
            requires_credentials: true,
            credentials_configured: self.client.is_some(),
            description: "Economic indicator series from FRED (GDP, CPI, unemployment, ...)",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({
            "series_id": "Explicit FRED series id overriding the symbol",
        })
    }

    fn validate_params(&self, symbol: &str, kwargs: &Kwargs) -> Result<(), FeedError> {
        validate_symbol(symbol)?;
        reject_unknown_kwargs(kwargs, ALLOWED_KWARGS)?;
        self.client().map(|_| ())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, FeedError> {
        let hits = self.client()?.search_series(query, limit).await?;
        Ok(hits
            .into_iter()
            .map(|s| SymbolMatch {
                symbol: s.id,
                name: s.title,
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
        validate_symbol(symbol)?;
        reject_unknown_kwargs(kwargs, ALLOWED_KWARGS)?;
        let observations = self
            .client()?
            .observations(&Self::series_id(symbol, kwargs), start, end)
            .await?;
        Ok(Frame::from_values(observations, "value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_uppercased_as_series_id() {
        assert_eq!(
            EconomicCollector::series_id("cpiaucsl", &Kwargs::new()),
            "CPIAUCSL"
        );
    }

    #[test]
    fn series_id_kwarg_overrides_symbol() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("series_id".to_string(), serde_json::json!("unrate"));
        assert_eq!(EconomicCollector::series_id("GDP", &kwargs), "UNRATE");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let collector = EconomicCollector::new(None);
        assert!(matches!(
            collector.validate_params("GDP", &Kwargs::new()).unwrap_err(),
            FeedError::Configuration(_)
        ));
    }
}
