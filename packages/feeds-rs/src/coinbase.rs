//! Coinbase Exchange market data client.
//!
//! Uses the public market data endpoints: `GET /products/{id}/candles` for
//! daily OHLCV and `GET /products` for product discovery. Candles come back
//! newest-first as `[time, low, high, open, close, volume]` arrays; the
//! window per request is capped at 300 candles, which at daily granularity
//! is far beyond any scheduler window, so no pagination is done here.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{FeedError, Observation};

const BASE_URL: &str = "https://api.exchange.coinbase.com";
const DAY_SECONDS: u32 = 86_400;

#[derive(Debug, Clone)]
pub struct CoinbaseClient {
    client: Client,
    base_url: String,
}

/// A tradeable product, e.g. `BTC-USD`.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub id: String,
    pub base_currency: String,
    pub quote_currency: String,
    #[serde(default)]
    pub status: String,
}

impl Default for CoinbaseClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CoinbaseClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different host (tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch daily candles for `product_id` over `[start, end]`.
    pub async fn daily_candles(
        &self,
        product_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, FeedError> {
        let url = format!(
            "{}/products/{}/candles?granularity={}&start={}&end={}",
            self.base_url,
            product_id.to_uppercase(),
            DAY_SECONDS,
            start.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ"),
        );

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "market-data-platform")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::from_status(status, "coinbase"));
        }

        let raw: Vec<[f64; 6]> = response
            .json()
            .await
            .map_err(|e| FeedError::Api(format!("coinbase payload: {e}")))?;
        parse_candles(raw)
    }

    /// List online products, e.g. for symbol search.
    pub async fn products(&self) -> Result<Vec<Product>, FeedError> {
        let url = format!("{}/products", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", "market-data-platform")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::from_status(status, "coinbase"));
        }

        let products: Vec<Product> = response
            .json()
            .await
            .map_err(|e| FeedError::Api(format!("coinbase products payload: {e}")))?;
        Ok(products
            .into_iter()
            .filter(|p| p.status.is_empty() || p.status == "online")
            .collect())
    }
}

/// Convert raw candle arrays into observations, oldest first.
fn parse_candles(raw: Vec<[f64; 6]>) -> Result<Vec<Observation>, FeedError> {
    let mut observations = Vec::with_capacity(raw.len());
    for [time, low, high, open, close, volume] in raw {
        let time = Utc
            .timestamp_opt(time as i64, 0)
            .single()
            .ok_or_else(|| FeedError::Api(format!("coinbase candle time {time} out of range")))?;
        observations.push(Observation {
            time,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume: Some(volume),
        });
    }
    observations.sort_by_key(|o| o.time);
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_candles_oldest_first() {
        // Newest-first, as the exchange returns them.
        let raw = vec![
            [1704326400.0, 42000.0, 45900.0, 45500.0, 42900.0, 12000.5],
            [1704240000.0, 44100.0, 45800.0, 44200.0, 45500.0, 9500.25],
        ];

        let candles = parse_candles(raw).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].time < candles[1].time);
        assert_eq!(candles[0].close, 45500.0);
        assert_eq!(candles[1].open, Some(45500.0));
        assert_eq!(candles[1].volume, Some(12000.5));
    }

    #[test]
    fn empty_payload_is_ok() {
        assert!(parse_candles(vec![]).unwrap().is_empty());
    }
}
