//! Asset classification and target-table routing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The six asset classes the platform collects.
///
/// Persisted as the Postgres `asset_type` enum on scheduled jobs; assets
/// themselves store the raw string so that a direct ingest call with a bogus
/// type can still be recorded instead of crashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Stock,
    Forex,
    Crypto,
    Bond,
    Commodity,
    EconomicIndicator,
}

impl AssetType {
    pub const ALL: [AssetType; 6] = [
        AssetType::Stock,
        AssetType::Forex,
        AssetType::Crypto,
        AssetType::Bond,
        AssetType::Commodity,
        AssetType::EconomicIndicator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Forex => "forex",
            AssetType::Crypto => "crypto",
            AssetType::Bond => "bond",
            AssetType::Commodity => "commodity",
            AssetType::EconomicIndicator => "economic_indicator",
        }
    }

    /// Parse the wire form, e.g. `"economic_indicator"`.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == raw)
    }

    /// The canonical time-series table rows of this type land in.
    pub fn target_table(&self) -> TargetTable {
        match self {
            AssetType::Stock | AssetType::Crypto | AssetType::Commodity => TargetTable::MarketData,
            AssetType::Forex => TargetTable::ForexRates,
            AssetType::Bond => TargetTable::BondRates,
            AssetType::EconomicIndicator => TargetTable::EconomicData,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four canonical time-series tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetTable {
    MarketData,
    ForexRates,
    BondRates,
    EconomicData,
}

impl TargetTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            TargetTable::MarketData => "market_data",
            TargetTable::ForexRates => "forex_rates",
            TargetTable::BondRates => "bond_rates",
            TargetTable::EconomicData => "economic_data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_every_asset_type() {
        for asset_type in AssetType::ALL {
            assert_eq!(AssetType::parse(asset_type.as_str()), Some(asset_type));
        }
    }

    #[test]
    fn parse_rejects_unknown_types() {
        assert_eq!(AssetType::parse("martian"), None);
        assert_eq!(AssetType::parse("Stock"), None);
    }

    #[test]
    fn ohlc_types_route_to_market_data() {
        assert_eq!(AssetType::Stock.target_table(), TargetTable::MarketData);
        assert_eq!(AssetType::Crypto.target_table(), TargetTable::MarketData);
        assert_eq!(AssetType::Commodity.target_table(), TargetTable::MarketData);
    }

    #[test]
    fn single_value_types_route_to_their_tables() {
        assert_eq!(AssetType::Forex.target_table(), TargetTable::ForexRates);
        assert_eq!(AssetType::Bond.target_table(), TargetTable::BondRates);
        assert_eq!(
            AssetType::EconomicIndicator.target_table(),
            TargetTable::EconomicData
        );
    }
}
