//! FRED (Federal Reserve Economic Data) client.
//!
//! Covers two endpoints: `series/observations` for fetching a series over a
//! date window, and `series/search` for symbol discovery. All requests need
//! an API key; constructing a client without one fails with
//! [`FeedError::Configuration`] so the misconfiguration is caught before any
//! job fires.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{FeedError, Observation};

const BASE_URL: &str = "https://api.stlouisfed.org/fred";

#[derive(Debug, Clone)]
pub struct FredClient {
    client: Client,
    base_url: String,
    api_key: String,
}

/// One hit from the series search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
}

#[derive(Deserialize)]
struct ObservationsResponse {
    observations: Vec<RawObservation>,
}

#[derive(Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    seriess: Vec<SeriesInfo>,
}

impl FredClient {
    pub fn new(api_key: Option<String>) -> Result<Self, FeedError> {
        let api_key = api_key.filter(|k| !k.is_empty()).ok_or_else(|| {
            FeedError::Configuration("FRED_API_KEY environment variable is not set".to_string())
        })?;

        Ok(Self {
            client: Client::new(),
            base_url: BASE_URL.to_string(),
            api_key,
        })
    }

    /// Point the client at a different host (tests).
    pub fn with_base_url(api_key: &str, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.to_string(),
        }
    }

    /// Fetch observations for `series_id` over `[start, end]`.
    pub async fn observations(
        &self,
        series_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, FeedError> {
        let url = format!(
            "{}/series/observations?series_id={}&api_key={}&file_type=json&observation_start={}&observation_end={}",
            self.base_url,
            series_id.to_uppercase(),
            self.api_key,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::from_status(status, "fred"));
        }

        let body: ObservationsResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Api(format!("fred payload: {e}")))?;
        parse_observations(body.observations)
    }

    /// Full-text search over FRED series.
    pub async fn search_series(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SeriesInfo>, FeedError> {
        let url = format!(
            "{}/series/search?search_text={}&api_key={}&file_type=json&limit={}",
            self.base_url,
            urlencode(query),
            self.api_key,
            limit,
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::from_status(status, "fred"));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Api(format!("fred search payload: {e}")))?;
        Ok(body.seriess)
    }
}

/// FRED reports missing observations as the literal value `"."`; those rows
/// are dropped rather than treated as errors.
fn parse_observations(raw: Vec<RawObservation>) -> Result<Vec<Observation>, FeedError> {
    let mut observations = Vec::with_capacity(raw.len());
    for obs in raw {
        if obs.value == "." {
            continue;
        }
        let date = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d")
            .map_err(|e| FeedError::Api(format!("fred date '{}': {e}", obs.date)))?;
        let value = obs
            .value
            .parse::<f64>()
            .map_err(|_| FeedError::Api(format!("fred returned non-numeric value '{}'", obs.value)))?;

        observations.push(Observation {
            time: date
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always valid")
                .and_utc(),
            open: None,
            high: None,
            low: None,
            close: value,
            volume: None,
        });
    }
    Ok(observations)
}

fn urlencode(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c.to_string(),
            ' ' => "+".to_string(),
            other => format!("%{:02X}", other as u32),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_configuration_error() {
        assert!(matches!(
            FredClient::new(None).unwrap_err(),
            FeedError::Configuration(_)
        ));
        assert!(matches!(
            FredClient::new(Some(String::new())).unwrap_err(),
            FeedError::Configuration(_)
        ));
    }

    #[test]
    fn parses_observations_and_skips_missing_values() {
        let raw = vec![
            RawObservation {
                date: "2024-01-02".to_string(),
                value: "3.95".to_string(),
            },
            RawObservation {
                date: "2024-01-03".to_string(),
                value: ".".to_string(),
            },
            RawObservation {
                date: "2024-01-04".to_string(),
                value: "3.99".to_string(),
            },
        ];

        let parsed = parse_observations(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].close, 3.95);
        assert_eq!(parsed[1].close, 3.99);
        assert_eq!(parsed[0].open, None);
    }

    #[test]
    fn non_numeric_value_is_api_error() {
        let raw = vec![RawObservation {
            date: "2024-01-02".to_string(),
            value: "n/a".to_string(),
        }];
        assert!(matches!(
            parse_observations(raw).unwrap_err(),
            FeedError::Api(_)
        ));
    }

    #[test]
    fn urlencode_handles_spaces_and_symbols() {
        assert_eq!(urlencode("10 year treasury"), "10+year+treasury");
        assert_eq!(urlencode("gdp&cpi"), "gdp%26cpi");
    }
}
