//! Frame-to-canonical-row mapping.
//!
//! Rewrites a collector's [`Frame`] into rows for the target table of the
//! asset type. An empty frame maps to an empty batch (not an error); a frame
//! missing required columns fails with [`MappingError`], which is never
//! retried.

use chrono::{DateTime, Utc};

use crate::collectors::Frame;
use crate::common::{AssetType, TargetTable};

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("{table} requires columns {missing:?} which the collector did not produce")]
    MissingColumns {
        table: &'static str,
        missing: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataRow {
    pub time: DateTime<Utc>,
    pub asset_id: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub time: DateTime<Utc>,
    pub asset_id: i64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
    pub time: DateTime<Utc>,
    pub asset_id: i64,
    pub value: f64,
}

/// Canonical rows ready for the data loader, tagged with their table.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedBatch {
    MarketData(Vec<MarketDataRow>),
    ForexRates(Vec<RateRow>),
    BondRates(Vec<RateRow>),
    EconomicData(Vec<ValueRow>),
}

impl MappedBatch {
    pub fn table(&self) -> TargetTable {
        match self {
            MappedBatch::MarketData(_) => TargetTable::MarketData,
            MappedBatch::ForexRates(_) => TargetTable::ForexRates,
            MappedBatch::BondRates(_) => TargetTable::BondRates,
            MappedBatch::EconomicData(_) => TargetTable::EconomicData,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MappedBatch::MarketData(rows) => rows.len(),
            MappedBatch::ForexRates(rows) | MappedBatch::BondRates(rows) => rows.len(),
            MappedBatch::EconomicData(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map a frame to canonical rows for `asset_type`.
pub fn map_frame(
    asset_type: AssetType,
    asset_id: i64,
    frame: &Frame,
) -> Result<MappedBatch, MappingError> {
    match asset_type.target_table() {
        TargetTable::MarketData => map_market_data(asset_id, frame),
        TargetTable::ForexRates => {
            Ok(MappedBatch::ForexRates(map_single_value(
                asset_id,
                frame,
                "forex_rates",
                &["rate"],
            )?))
        }
        TargetTable::BondRates => {
            Ok(MappedBatch::BondRates(map_single_value(
                asset_id,
                frame,
                "bond_rates",
                &["value", "rate"],
            )?))
        }
        TargetTable::EconomicData => {
            let rows = map_single_value(asset_id, frame, "economic_data", &["value"])?;
            Ok(MappedBatch::EconomicData(
                rows.into_iter()
                    .map(|r| ValueRow {
                        time: r.time,
                        asset_id: r.asset_id,
                        value: r.rate,
                    })
                    .collect(),
            ))
        }
    }
}

fn map_market_data(asset_id: i64, frame: &Frame) -> Result<MappedBatch, MappingError> {
    if frame.is_empty() {
        return Ok(MappedBatch::MarketData(Vec::new()));
    }

    let missing: Vec<String> = ["open", "high", "low", "close"]
        .iter()
        .filter(|c| !frame.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(MappingError::MissingColumns {
            table: "market_data",
            missing,
        });
    }

    let rows = frame
        .rows()
        .iter()
        .filter_map(|row| {
            Some(MarketDataRow {
                time: row.time,
                asset_id,
                open: row.get("open")?,
                high: row.get("high")?,
                low: row.get("low")?,
                close: row.get("close")?,
                volume: row.get("volume"),
            })
        })
        .collect();
    Ok(MappedBatch::MarketData(rows))
}

/// Single-value mapping shared by forex, bond, and economic tables.
///
/// Tries `preferred` column names in order; falls back to the frame's single
/// price-like column when there is exactly one candidate besides `volume`.
fn map_single_value(
    asset_id: i64,
    frame: &Frame,
    table: &'static str,
    preferred: &[&str],
) -> Result<Vec<RateRow>, MappingError> {
    if frame.is_empty() {
        return Ok(Vec::new());
    }

    let column = preferred
        .iter()
        .copied()
        .find(|c| frame.has_column(c))
        .or_else(|| single_price_column(frame))
        .ok_or_else(|| MappingError::MissingColumns {
            table,
            missing: preferred.iter().map(|c| c.to_string()).collect(),
        })?;

    Ok(frame
        .rows()
        .iter()
        .filter_map(|row| {
            Some(RateRow {
                time: row.time,
                asset_id,
                rate: row.get(column)?,
            })
        })
        .collect())
}

fn single_price_column<'a>(frame: &'a Frame) -> Option<&'a str> {
    let candidates: Vec<&str> = frame
        .columns()
        .into_iter()
        .filter(|c| *c != "volume")
        .collect();
    match candidates.as_slice() {
        &[only] => Some(only),
        _ => None,
    }
}
