//! Bond yield collector backed by FRED treasury series.

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

/// Friendly tenor -> FRED constant-maturity series.
const TENORS: &[(&str, &str)] = &[
    ("US3M", "DGS3MO"),
    ("US6M", "DGS6MO"),
    ("US1Y", "DGS1"),
    ("US2Y", "DGS2"),
    ("US5Y", "DGS5"),
    ("US7Y", "DGS7"),
    ("US10Y", "DGS10"),
    ("US20Y", "DGS20"),
    ("US30Y", "DGS30"),
];

pub struct BondCollector {
    client: Option<FredClient>,
}

impl BondCollector {
    /// The client is absent when `FRED_API_KEY` is not configured; every
    /// collect then fails with a configuration error instead of panicking.
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

    /// Resolve a tenor alias (`US10Y`) or treat the symbol as a raw FRED
    /// series id; the `series_id` kwarg wins over both.
    fn series_id(symbol: &str, kwargs: &Kwargs) -> String {
        if let Some(series) = kwargs.get("series_id").and_then(|v| v.as_str()) {
            return series.to_uppercase();
        }
        let upper = symbol.to_uppercase();
        TENORS
            .iter()
            .find(|(tenor, _)| *tenor == upper)
            .map(|(_, series)| series.to_string())
            .unwrap_or(upper)
    }
}

#[async_trait]
impl Collector for BondCollector {
    fn name(&self) -> &'static str {
        "BondCollector"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Bond
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type(),
            source: "fred",
            requires_credentials: true,
            credentials_configured: self.client.is_some(),
            description: "Daily treasury yields from FRED constant-maturity series",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({
            "series_id": "Explicit FRED series id overriding the symbol mapping",
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
        Ok(Frame::from_values(observations, "rate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenor_aliases_resolve_to_fred_series() {
        assert_eq!(BondCollector::series_id("US10Y", &Kwargs::new()), "DGS10");
        assert_eq!(BondCollector::series_id("us2y", &Kwargs::new()), "DGS2");
    }

    #[test]
    fn raw_series_ids_pass_through() {
        assert_eq!(BondCollector::series_id("DGS30", &Kwargs::new()), "DGS30");
    }

    #[test]
    fn series_id_kwarg_wins() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("series_id".to_string(), serde_json::json!("dfii10"));
        assert_eq!(BondCollector::series_id("US10Y", &kwargs), "DFII10");
    }

    #[test]
    fn missing_key_fails_validation_with_configuration_error() {
        let collector = BondCollector::new(None);
        let err = collector
            .validate_params("US10Y", &Kwargs::new())
            .unwrap_err();
        assert!(matches!(err, FeedError::Configuration(_)));
    }

    #[test]
    fn configured_key_passes_validation() {
        let collector = BondCollector::new(Some("test-key".to_string()));
        assert!(collector.validate_params("US10Y", &Kwargs::new()).is_ok());
    }
}
