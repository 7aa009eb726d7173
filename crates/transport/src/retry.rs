//! Transport-level retry policy
//!
//! Only idempotent reads are retried, and only on statuses that indicate a
//! transient server or overload condition. Writes are never replayed here:
//! a 5xx after a POST may still have been applied upstream.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};

/// Statuses worth another attempt: request timeout, payload too large,
/// too many requests, and the 5xx family minus 501.
const RETRYABLE_STATUSES: &[u16] = &[408, 413, 429, 500, 502, 503, 504];

/// Backoff exponent cap so the shift below never overflows.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Retry limits and backoff for idempotent requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including `Retry-After`.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether attempt number `retries_so_far + 1` may be retried for this
    /// method and status.
    pub fn should_retry(&self, method: &Method, status: StatusCode, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries && is_idempotent(method) && is_retryable_status(status)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// A `Retry-After` header given in seconds takes precedence over the
    /// exponential schedule. Both are capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, headers: &HeaderMap) -> Duration {
        let delay = retry_after(headers).unwrap_or_else(|| {
            let shift = retry.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
            self.base_delay.saturating_mul(1 << shift)
        });
        delay.min(self.max_delay)
    }
}

/// GET-class methods that can be repeated without additional side effects.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Whether a status is in the transient whitelist.
pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Parse a `Retry-After` header expressed in whole seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
