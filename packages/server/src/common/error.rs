//! Failure classification shared by the engine, retry policy, and metrics.

use std::fmt;

use feeds::FeedError;
use serde::{Deserialize, Serialize};

/// Why an ingestion run failed.
///
/// The category decides whether the scheduler retries the attempt and is
/// used verbatim as a metric label and on the execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Api,
    Validation,
    Configuration,
    Mapping,
    Persistence,
    Unknown,
}

impl ErrorCategory {
    /// Whether the scheduler should retry an attempt that failed this way.
    pub fn is_retriable(&self) -> bool {
        match self {
            ErrorCategory::RateLimit
            | ErrorCategory::Api
            | ErrorCategory::Persistence
            | ErrorCategory::Unknown => true,
            ErrorCategory::Validation | ErrorCategory::Configuration | ErrorCategory::Mapping => {
                false
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Api => "api",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Mapping => "mapping",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "rate_limit" => Some(ErrorCategory::RateLimit),
            "api" => Some(ErrorCategory::Api),
            "validation" => Some(ErrorCategory::Validation),
            "configuration" => Some(ErrorCategory::Configuration),
            "mapping" => Some(ErrorCategory::Mapping),
            "persistence" => Some(ErrorCategory::Persistence),
            "unknown" => Some(ErrorCategory::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&FeedError> for ErrorCategory {
    fn from(err: &FeedError) -> Self {
        match err {
            FeedError::RateLimited(_) => ErrorCategory::RateLimit,
            FeedError::Api(_) => ErrorCategory::Api,
            FeedError::Validation(_) => ErrorCategory::Validation,
            FeedError::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_categories_are_retriable() {
        assert!(ErrorCategory::RateLimit.is_retriable());
        assert!(ErrorCategory::Api.is_retriable());
        assert!(ErrorCategory::Persistence.is_retriable());
        assert!(ErrorCategory::Unknown.is_retriable());
    }

    #[test]
    fn caller_error_categories_are_not_retriable() {
        assert!(!ErrorCategory::Validation.is_retriable());
        assert!(!ErrorCategory::Configuration.is_retriable());
        assert!(!ErrorCategory::Mapping.is_retriable());
    }

    #[test]
    fn feed_errors_classify_by_variant() {
        let cases = [
            (FeedError::RateLimited("x".into()), ErrorCategory::RateLimit),
            (FeedError::Api("x".into()), ErrorCategory::Api),
            (FeedError::Validation("x".into()), ErrorCategory::Validation),
            (
                FeedError::Configuration("x".into()),
                ErrorCategory::Configuration,
            ),
        ];
        for (err, want) in cases {
            assert_eq!(ErrorCategory::from(&err), want);
        }
    }

    #[test]
    fn as_str_and_parse_roundtrip() {
        for category in [
            ErrorCategory::RateLimit,
            ErrorCategory::Api,
            ErrorCategory::Validation,
            ErrorCategory::Configuration,
            ErrorCategory::Mapping,
            ErrorCategory::Persistence,
            ErrorCategory::Unknown,
        ] {
            assert_eq!(ErrorCategory::parse(category.as_str()), Some(category));
        }
    }
}
