//! Tabular collector output.
//!
//! Collectors return a [`Frame`]: timestamped rows of named numeric columns.
//! The schema mapper rewrites frames into canonical table rows, so column
//! names are the contract between a collector and the mapper.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use feeds::Observation;

/// One timestamped row of named values.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub time: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl FrameRow {
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

/// A collector's tabular result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    rows: Vec<FrameRow>,
}

impl Frame {
    pub fn new(rows: Vec<FrameRow>) -> Self {
        Self { rows }
    }

    /// Build an OHLCV frame from bar observations; bars missing any price
    /// component are dropped.
    pub fn from_bars(observations: Vec<Observation>) -> Self {
        let rows = observations
            .into_iter()
            .filter_map(|obs| {
                let mut values = BTreeMap::new();
                values.insert("open".to_string(), obs.open?);
                values.insert("high".to_string(), obs.high?);
                values.insert("low".to_string(), obs.low?);
                values.insert("close".to_string(), obs.close);
                if let Some(volume) = obs.volume {
                    values.insert("volume".to_string(), volume);
                }
                Some(FrameRow {
                    time: obs.time,
                    values,
                })
            })
            .collect();
        Self { rows }
    }

    /// Build a single-column frame (e.g. `rate`, `value`) from the closing
    /// value of each observation.
    pub fn from_values(observations: Vec<Observation>, column: &str) -> Self {
        let rows = observations
            .into_iter()
            .map(|obs| {
                let mut values = BTreeMap::new();
                values.insert(column.to_string(), obs.close);
                FrameRow {
                    time: obs.time,
                    values,
                }
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[FrameRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names present in the first row (frames are homogeneous by
    /// construction).
    pub fn columns(&self) -> Vec<&str> {
        self.rows
            .first()
            .map(|row| row.values.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.rows
            .first()
            .is_some_and(|row| row.values.contains_key(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(close: f64) -> Observation {
        Observation {
            time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open: Some(1.0),
            high: Some(2.0),
            low: Some(0.5),
            close,
            volume: Some(100.0),
        }
    }

    #[test]
    fn from_bars_builds_ohlcv_columns() {
        let frame = Frame::from_bars(vec![bar(1.5)]);
        assert_eq!(frame.len(), 1);
        assert!(frame.has_column("open"));
        assert!(frame.has_column("volume"));
        assert_eq!(frame.rows()[0].get("close"), Some(1.5));
    }

    #[test]
    fn from_bars_drops_incomplete_bars() {
        let mut incomplete = bar(1.5);
        incomplete.high = None;
        let frame = Frame::from_bars(vec![incomplete, bar(2.0)]);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.rows()[0].get("close"), Some(2.0));
    }

    #[test]
    fn from_values_uses_the_requested_column() {
        let frame = Frame::from_values(vec![bar(3.95)], "rate");
        assert_eq!(frame.columns(), vec!["rate"]);
        assert_eq!(frame.rows()[0].get("rate"), Some(3.95));
        assert_eq!(frame.rows()[0].get("close"), None);
    }

    #[test]
    fn empty_frame_has_no_columns() {
        let frame = Frame::default();
        assert!(frame.is_empty());
        assert!(frame.columns().is_empty());
        assert!(!frame.has_column("close"));
    }
}
