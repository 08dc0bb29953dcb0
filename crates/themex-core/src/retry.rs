//! Retry policy and backoff math.
//!
//! The async executor lives in `themex-resilience`; this module holds the
//! portable building blocks it needs:
//!
//! - [`RetryPolicy`]: attempt cap, exponential base/cap, jitter
//! - [`backoff_delay_ms`]: `min(cap, base * 2^attempt)` with symmetric jitter
//! - [`parse_retry_after`]: `Retry-After` header values
//! - [`Retryable`]: error classification used by the executor

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Default total attempts (first call included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// How often and how patiently to retry a fallible call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 is treated as 1.
    pub max_attempts: u32,
    /// Delay before the first retry, in ms.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in ms.
    pub max_delay_ms: u64,
    /// Symmetric jitter range; 0.2 varies each delay by ±20 %.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Attempt cap, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `attempt` (zero-based), given `random` in `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }
}

/// Classifies an error as worth retrying.
///
/// Timeouts, network failures, 5xx and rate limits are retryable; validation,
/// authentication and other 4xx responses are terminal.
pub trait Retryable {
    /// Whether another attempt might succeed.
    fn is_retryable(&self) -> bool;

    /// Delay the server asked for, overriding computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for crate::errors::EngineError {
    fn is_retryable(&self) -> bool {
        crate::errors::EngineError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        crate::errors::EngineError::retry_after(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff with symmetric jitter.
///
/// `random` maps `[0, 1]` onto `[-jitter, +jitter]`; 0.5 yields the bare
/// exponential value.
#[must_use]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

/// Parse a `Retry-After` header (delta seconds or HTTP-date) into a delay.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delay_ms = date
        .signed_duration_since(chrono::Utc::now())
        .num_milliseconds()
        .max(0);
    Some(Duration::from_millis(delay_ms as u64))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay_ms, 500);
        assert_eq!(p.max_delay_ms, 30_000);
    }

    #[test]
    fn policy_partial_json_uses_defaults() {
        let p: RetryPolicy = serde_json::from_str(r#"{"maxAttempts": 7}"#).unwrap();
        assert_eq!(p.max_attempts, 7);
        assert_eq!(p.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    #[test]
    fn zero_attempts_means_one() {
        let p = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(p.attempts(), 1);
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let d: Vec<u64> = (0..4)
            .map(|a| backoff_delay_ms(a, 1000, 60_000, 0.0, 0.9))
            .collect();
        assert_eq!(d, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn capped_at_max() {
        assert_eq!(backoff_delay_ms(20, 1000, 60_000, 0.2, 0.5), 60_000);
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(backoff_delay_ms(0, 1000, 60_000, 0.2, 0.0), 800);
        assert_eq!(backoff_delay_ms(0, 1000, 60_000, 0.2, 0.5), 1000);
        assert_eq!(backoff_delay_ms(0, 1000, 60_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let d = backoff_delay_ms(500, u64::MAX / 2, u64::MAX, 0.0, 0.5);
        assert!(d > 0);
    }

    #[test]
    fn delay_for_uses_policy() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.0,
        };
        assert_eq!(p.delay_for(2, 0.3), Duration::from_millis(400));
        assert_eq!(p.delay_for(9, 0.3), Duration::from_millis(1_000));
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("-3"), None);
    }

    #[test]
    fn retry_after_past_date_is_zero() {
        use chrono::{TimeZone, Utc};
        let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap().to_rfc2822();
        assert_eq!(parse_retry_after(&past), Some(Duration::ZERO));
    }
}
