//! Algorithm parameters for one rule.
//!
//! A `Quota` carries every numeric parameter the built-in algorithms use:
//!
//! - window algorithms read `limit` requests per `window`;
//! - the token bucket reads `capacity` and `refill_rate` (tokens/second);
//! - GCRA reads the emission period (`window / limit`) and `capacity` as burst.
//!
//! Unset `capacity` defaults to `limit`, unset `refill_rate` to
//! `limit / window`.
//!
//! # Examples
//!
//! ```ignore
//! use strategy_ratelimit::Quota;
//! use std::time::Duration;
//!
//! // 10 requests per minute
//! let quota = Quota::per_minute(10);
//!
//! // Bucket of 5 tokens refilled at 1 token per second
//! let quota = Quota::token_bucket(5, 1.0);
//!
//! // 50 requests per 30 seconds
//! let quota = Quota::new(50, Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Rate limiting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Maximum number of requests in the window.
    limit: u64,

    /// Time window duration.
    #[serde(with = "humantime_serde")]
    window: Duration,

    /// Bucket capacity / burst size (defaults to `limit` if not set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    capacity: Option<u64>,

    /// Refill rate for token-based algorithms (tokens per second).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refill_rate: Option<f64>,
}

impl Quota {
    /// Create a new quota with the given limit and window.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0 or `window` is zero duration.
    pub fn new(limit: u64, window: Duration) -> Self {
        assert!(limit > 0, "limit must be greater than 0");
        assert!(!window.is_zero(), "window must be non-zero");

        Self {
            limit,
            window,
            capacity: None,
            refill_rate: None,
        }
    }

    /// Create a quota allowing `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Create a quota allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// Create a quota allowing `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Create a token bucket quota: `capacity` tokens, refilled at
    /// `refill_rate` tokens per second.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or `refill_rate` is not positive.
    pub fn token_bucket(capacity: u64, refill_rate: f64) -> Self {
        assert!(refill_rate > 0.0, "refill_rate must be positive");
        let window = Duration::from_secs_f64(capacity as f64 / refill_rate);
        Self::new(capacity, window)
            .with_capacity(capacity)
            .with_refill_rate(refill_rate)
    }

    /// Set the bucket capacity / burst size.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set a custom refill rate (tokens per second).
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = Some(rate);
        self
    }

    /// Check parameters that deserialization cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(ConfigError::InvalidQuota("limit must be greater than 0".into()).into());
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidQuota("window must be non-zero".into()).into());
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::InvalidQuota("capacity must be greater than 0".into()).into());
        }
        if let Some(rate) = self.refill_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidQuota(format!(
                    "refill rate must be a positive number, got {rate}"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Maximum requests allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window duration in milliseconds, at least 1.
    pub fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }

    /// Configured capacity, or `limit` if not set.
    pub fn effective_capacity(&self) -> u64 {
        self.capacity.unwrap_or(self.limit)
    }

    /// Configured refill rate, or `limit / window_seconds`.
    pub fn effective_refill_rate(&self) -> f64 {
        self.refill_rate
            .unwrap_or_else(|| self.limit as f64 / self.window.as_secs_f64())
    }

    /// Emission interval for GCRA: the time one request "costs".
    pub fn period(&self) -> Duration {
        let nanos = self.window.as_nanos() / u128::from(self.limit.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// How far ahead of now the GCRA arrival time may run (burst tolerance).
    pub fn max_tat_offset(&self) -> Duration {
        let burst = self.effective_capacity().saturating_sub(1);
        let nanos = self.period().as_nanos().saturating_mul(u128::from(burst));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_per_second() {
        let quota = Quota::per_second(10);
        assert_eq!(quota.limit(), 10);
        assert_eq!(quota.window(), Duration::from_secs(1));
        assert_eq!(quota.effective_capacity(), 10);
        assert!((quota.effective_refill_rate() - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_token_bucket_quota() {
        let quota = Quota::token_bucket(5, 1.0);
        assert_eq!(quota.effective_capacity(), 5);
        assert!((quota.effective_refill_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(quota.window(), Duration::from_secs(5));
    }

    #[test]
    fn test_capacity_below_limit_matches_deserialized() {
        let built = Quota::per_minute(60).with_capacity(30);
        assert_eq!(built.effective_capacity(), 30);

        let parsed: Quota =
            serde_json::from_str(r#"{"limit": 60, "window": "1m", "capacity": 30}"#).unwrap();
        assert_eq!(parsed, built);
        assert_eq!(parsed.max_tat_offset(), built.max_tat_offset());
    }

    #[test]
    fn test_gcra_period_and_offset() {
        let quota = Quota::per_second(10);
        assert_eq!(quota.period(), Duration::from_millis(100));

        let quota = Quota::per_second(1).with_capacity(5);
        assert_eq!(quota.max_tat_offset(), Duration::from_secs(4));
    }

    #[test]
    fn test_deserialize_and_validate() {
        let quota: Quota =
            serde_json::from_str(r#"{"limit": 10, "window": "60s", "refillRate": 0.5}"#).unwrap();
        assert_eq!(quota.limit(), 10);
        assert_eq!(quota.window(), Duration::from_secs(60));
        assert!((quota.effective_refill_rate() - 0.5).abs() < f64::EPSILON);
        assert!(quota.validate().is_ok());

        let quota: Quota = serde_json::from_str(r#"{"limit": 0, "window": "1s"}"#).unwrap();
        assert!(quota.validate().is_err());
    }

    #[test]
    #[should_panic]
    fn test_quota_zero_limit_panics() {
        Quota::new(0, Duration::from_secs(60));
    }
}
