//! Decision types returned by algorithms.
//!
//! An algorithm answers every check with a `Decision`: allowed or denied,
//! plus a `RateLimitInfo` describing the state of the key afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The result of one algorithm check.
#[derive(Debug, Clone)]
pub struct Decision {
    allowed: bool,
    info: RateLimitInfo,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(info: RateLimitInfo) -> Self {
        Self {
            allowed: true,
            info,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(info: RateLimitInfo) -> Self {
        Self {
            allowed: false,
            info,
        }
    }

    /// Create an allowed or denied decision.
    pub fn from_outcome(allowed: bool, info: RateLimitInfo) -> Self {
        Self { allowed, info }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// Consume the decision and return the info.
    pub fn into_info(self) -> RateLimitInfo {
        self.info
    }
}

/// State of a key after a check.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Maximum requests allowed.
    pub limit: u64,
    /// Remaining requests before the next deny.
    pub remaining: u64,
    /// Time until the key is fully replenished.
    pub reset_after: Duration,
    /// How long to wait before retrying (only set when exhausted).
    pub retry_after: Option<Duration>,
    /// Name of the algorithm that made this decision.
    pub algorithm: Option<&'static str>,
    /// Additional metadata.
    pub metadata: Option<DecisionMetadata>,
}

impl RateLimitInfo {
    /// Create a new rate limit info.
    pub fn new(limit: u64, remaining: u64, reset_after: Duration) -> Self {
        Self {
            limit,
            remaining,
            reset_after,
            retry_after: None,
            algorithm: None,
            metadata: None,
        }
    }

    /// Set the retry-after duration.
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Set the algorithm name.
    pub fn with_algorithm(mut self, name: &'static str) -> Self {
        self.algorithm = Some(name);
        self
    }

    /// Set additional metadata.
    pub fn with_metadata(mut self, metadata: DecisionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reset time in whole seconds.
    pub fn reset_seconds(&self) -> u64 {
        self.reset_after.as_secs()
    }

    /// Retry-after in milliseconds, if set.
    pub fn retry_after_millis(&self) -> Option<u64> {
        self.retry_after.map(|d| d.as_millis() as u64)
    }

    /// Convert to HTTP headers.
    ///
    /// `Retry-After` is rounded up to whole seconds.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_seconds().to_string()),
        ];

        if let Some(retry_after) = self.retry_after {
            let secs = retry_after.as_millis().div_ceil(1000);
            headers.push(("Retry-After", secs.to_string()));
        }

        if let Some(algorithm) = self.algorithm {
            headers.push(("X-RateLimit-Policy", algorithm.to_string()));
        }

        headers
    }
}

/// Algorithm-specific detail about a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    /// Tokens available after the check (token bucket).
    pub tokens_available: Option<f64>,
    /// Theoretical arrival time in Unix nanoseconds (GCRA).
    pub tat: Option<u64>,
    /// Weighted request count (sliding window).
    pub weighted_count: Option<f64>,
}

impl DecisionMetadata {
    /// Create new empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set tokens available.
    pub fn with_tokens_available(mut self, tokens: f64) -> Self {
        self.tokens_available = Some(tokens);
        self
    }

    /// Set GCRA TAT.
    pub fn with_tat(mut self, tat: u64) -> Self {
        self.tat = Some(tat);
        self
    }

    /// Set the weighted count.
    pub fn with_weighted_count(mut self, count: f64) -> Self {
        self.weighted_count = Some(count);
        self
    }
}
