//! Stooq daily-bar client.
//!
//! Stooq serves historical daily bars as CSV from
//! `https://stooq.com/q/d/l/?s=<symbol>&d1=<yyyymmdd>&d2=<yyyymmdd>&i=d`.
//! Stock tickers use a market suffix (`aapl.us`), forex pairs are bare
//! (`eurusd`), commodity futures carry an `.f` suffix (`gc.f`).

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;

use crate::{FeedError, Observation};

const BASE_URL: &str = "https://stooq.com/q/d/l/";

#[derive(Debug, Clone)]
pub struct StooqClient {
    client: Client,
    base_url: String,
}

impl Default for StooqClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StooqClient {
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

    /// Fetch daily bars for `symbol` over `[start, end]` (inclusive days).
    pub async fn daily_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, FeedError> {
        let url = format!(
            "{}?s={}&d1={}&d2={}&i=d",
            self.base_url,
            symbol.to_lowercase(),
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::from_status(status, "stooq"));
        }

        let body = response.text().await?;
        parse_daily_csv(symbol, &body)
    }
}

/// Parse a Stooq daily CSV payload.
///
/// The expected header is `Date,Open,High,Low,Close,Volume` (volume absent
/// for forex pairs). Stooq answers unknown symbols with a 200 and a
/// `No data` body, which is reported as a validation failure.
pub fn parse_daily_csv(symbol: &str, body: &str) -> Result<Vec<Observation>, FeedError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with("No data") {
        return Err(FeedError::Validation(format!(
            "stooq has no data for symbol '{symbol}'"
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(trimmed.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FeedError::Api(format!("stooq csv header: {e}")))?
        .clone();
    let volume_idx = headers.iter().position(|h| h.eq_ignore_ascii_case("volume"));

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FeedError::Api(format!("stooq csv row: {e}")))?;
        if record.len() < 5 {
            continue;
        }

        let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d")
            .map_err(|e| FeedError::Api(format!("stooq date '{}': {e}", &record[0])))?;
        let time = date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();

        let open = parse_field(&record[1])?;
        let high = parse_field(&record[2])?;
        let low = parse_field(&record[3])?;
        let close = parse_field(&record[4])?;
        let volume = volume_idx
            .and_then(|i| record.get(i))
            .and_then(|v| v.parse::<f64>().ok());

        observations.push(Observation {
            time,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume,
        });
    }

    Ok(observations)
}

fn parse_field(raw: &str) -> Result<f64, FeedError> {
    raw.parse::<f64>()
        .map_err(|_| FeedError::Api(format!("stooq returned non-numeric field '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Date,Open,High,Low,Close,Volume
2024-01-02,185.64,186.95,183.82,185.14,82488700
2024-01-03,184.22,185.88,183.43,184.25,58414500";

    #[test]
    fn parses_daily_bars() {
        let bars = parse_daily_csv("aapl.us", SAMPLE).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 185.14);
        assert_eq!(bars[0].volume, Some(82488700.0));
        assert_eq!(bars[0].time.format("%Y-%m-%d").to_string(), "2024-01-02");
    }

    #[test]
    fn forex_payload_without_volume() {
        let body = "Date,Open,High,Low,Close\n2024-01-02,1.0942,1.0968,1.0920,1.0945";
        let bars = parse_daily_csv("eurusd", body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, None);
        assert_eq!(bars[0].close, 1.0945);
    }

    #[test]
    fn no_data_body_is_validation_error() {
        let err = parse_daily_csv("notasymbol.us", "No data").unwrap_err();
        assert!(matches!(err, FeedError::Validation(_)));
    }

    #[test]
    fn empty_body_is_validation_error() {
        let err = parse_daily_csv("aapl.us", "").unwrap_err();
        assert!(matches!(err, FeedError::Validation(_)));
    }
}
