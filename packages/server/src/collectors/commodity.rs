//! Commodity collector backed by Stooq continuous futures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feeds::stooq::StooqClient;
use feeds::FeedError;

use super::{
    frame::Frame, reject_unknown_kwargs, search_curated, validate_symbol, Collector,
    CollectorMetadata, Kwargs, SymbolMatch,
};
use crate::common::AssetType;

/// Friendly name -> Stooq continuous-futures symbol.
const FUTURES: &[(&str, &str)] = &[
    ("gold", "gc.f"),
    ("silver", "si.f"),
    ("platinum", "pl.f"),
    ("copper", "hg.f"),
    ("wti", "cl.f"),
    ("oil", "cl.f"),
    ("brent", "cb.f"),
    ("natgas", "ng.f"),
    ("corn", "zc.f"),
    ("wheat", "zw.f"),
    ("soybeans", "zs.f"),
    ("coffee", "kc.f"),
    ("sugar", "sb.f"),
    ("cotton", "ct.f"),
];

const CURATED: &[(&str, &str)] = &[
    ("gold", "Gold futures (GC)"),
    ("silver", "Silver futures (SI)"),
    ("platinum", "Platinum futures (PL)"),
    ("copper", "Copper futures (HG)"),
    ("wti", "WTI crude oil futures (CL)"),
    ("brent", "Brent crude oil futures (CB)"),
    ("natgas", "Natural gas futures (NG)"),
    ("corn", "Corn futures (ZC)"),
    ("wheat", "Wheat futures (ZW)"),
    ("soybeans", "Soybean futures (ZS)"),
    ("coffee", "Coffee futures (KC)"),
    ("sugar", "Sugar futures (SB)"),
    ("cotton", "Cotton futures (CT)"),
];

pub struct CommodityCollector {
    client: StooqClient,
}

impl Default for CommodityCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CommodityCollector {
    pub fn new() -> Self {
        Self {
            client: StooqClient::new(),
        }
    }

    /// Resolve a friendly name (`gold`) or pass a raw Stooq futures symbol
    /// (`gc.f`) through.
    fn futures_symbol(symbol: &str) -> String {
        let lower = symbol.to_lowercase();
        FUTURES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, stooq)| stooq.to_string())
            .unwrap_or(lower)
    }
}

#[async_trait]
impl Collector for CommodityCollector {
    fn name(&self) -> &'static str {
        "CommodityCollector"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Commodity
    }

    fn metadata(&self) -> CollectorMetadata {
        CollectorMetadata {
            name: self.name(),
            asset_type: self.asset_type(),
            source: "stooq",
            requires_credentials: false,
            credentials_configured: true,
            description: "Daily OHLCV bars for continuous commodity futures",
        }
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn validate_params(&self, symbol: &str, kwargs: &Kwargs) -> Result<(), FeedError> {
        validate_symbol(symbol)?;
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
            .daily_bars(&Self::futures_symbol(symbol), start, end)
            .await?;
        Ok(Frame::from_bars(bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_names_resolve_to_futures_symbols() {
        assert_eq!(CommodityCollector::futures_symbol("gold"), "gc.f");
        assert_eq!(CommodityCollector::futures_symbol("WTI"), "cl.f");
    }

    #[test]
    fn raw_stooq_symbols_pass_through() {
        assert_eq!(CommodityCollector::futures_symbol("gc.f"), "gc.f");
        assert_eq!(CommodityCollector::futures_symbol("ZR.F"), "zr.f");
    }

    #[tokio::test]
    async fn search_covers_energy_and_metals() {
        let collector = CommodityCollector::new();
        let hits = collector.search("oil", 10).await.unwrap();
        assert!(hits.iter().any(|h| h.symbol == "wti"));
        assert!(hits.iter().any(|h| h.symbol == "brent"));
    }
}
