//! Shared rate limiting for collectors.
//!
//! All jobs using the same collector class share one limiter, so parallel
//! workers cannot independently exhaust an upstream quota. The registry is
//! process-wide: asking for the same class name always returns the same
//! limiter instance.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Sliding-window rate limiter: at most `max_calls` admissions in any
/// trailing `period`.
///
/// `acquire` waits cooperatively (tokio sleep) until a slot frees; callers
/// race it against a cancellation token when they need to bail out early.
/// Limits can be changed at runtime; waiters pick the new limits up on their
/// next admission check and in-flight calls are never revoked.
pub struct SharedRateLimiter {
    name: String,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    max_calls: usize,
    period: Duration,
    admitted: VecDeque<Instant>,
}

impl SharedRateLimiter {
    pub fn new(name: impl Into<String>, max_calls: u32, period: Duration) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LimiterState {
                max_calls: max_calls.max(1) as usize,
                period,
                admitted: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for a slot and consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                let period = state.period;
                while state
                    .admitted
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= period)
                {
                    state.admitted.pop_front();
                }

                if state.admitted.len() < state.max_calls {
                    state.admitted.push_back(now);
                    return;
                }

                // Oldest admission ages out first; sleep until it does.
                let oldest = *state.admitted.front().expect("window is non-empty");
                period.saturating_sub(now.duration_since(oldest))
            };

            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    /// Replace the limiter parameters. Takes effect on the next admission
    /// check; calls already admitted stay admitted.
    pub fn reconfigure(&self, max_calls: u32, period: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.max_calls = max_calls.max(1) as usize;
        state.period = period;
        tracing::info!(
            limiter = %self.name,
            max_calls,
            period_secs = period.as_secs(),
            "rate limiter reconfigured"
        );
    }

    /// Number of admissions currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let period = state.period;
        while state
            .admitted
            .front()
            .is_some_and(|&t| now.duration_since(t) >= period)
        {
            state.admitted.pop_front();
        }
        state.admitted.len()
    }
}

/// Process-wide registry of per-collector-class limiters.
///
/// The contract is identity: `get("StockCollector")` returns the same
/// limiter instance for every caller, which is what makes the limit shared
/// across jobs.
pub struct RateLimiterRegistry {
    default_calls: u32,
    default_period: Duration,
    limiters: Mutex<HashMap<String, Arc<SharedRateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(default_calls: u32, default_period: Duration) -> Self {
        Self {
            default_calls,
            default_period,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the shared limiter for a collector class.
    pub fn get(&self, collector_class: &str) -> Arc<SharedRateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        limiters
            .entry(collector_class.to_string())
            .or_insert_with(|| {
                Arc::new(SharedRateLimiter::new(
                    collector_class,
                    self.default_calls,
                    self.default_period,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_class_returns_same_limiter() {
        let registry = RateLimiterRegistry::new(10, Duration::from_secs(60));
        let a = registry.get("StockCollector");
        let b = registry.get("StockCollector");
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get("CryptoCollector");
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_max_calls_without_waiting() {
        let limiter = SharedRateLimiter::new("test", 3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_call_waits_for_the_window() {
        let limiter = Arc::new(SharedRateLimiter::new("test", 3, Duration::from_secs(60)));
        for _ in 0..3 {
            limiter.acquire().await;
        }

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire().await;
                tokio::time::Instant::now()
            })
        };

        let before = tokio::time::Instant::now();
        let admitted_at = waiter.await.unwrap();
        assert!(admitted_at.duration_since(before) >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_as_old_calls_age_out() {
        let limiter = SharedRateLimiter::new("test", 2, Duration::from_secs(10));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.in_window(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_loosens_a_full_window() {
        let limiter = Arc::new(SharedRateLimiter::new("test", 1, Duration::from_secs(60)));
        limiter.acquire().await;

        limiter.reconfigure(3, Duration::from_secs(60));
        // Admitted immediately under the new limit.
        limiter.acquire().await;
        assert_eq!(limiter.in_window(), 2);
    }
}
