//! Rule configuration.
//!
//! Rules are usually loaded from a configuration document; every field has
//! a camelCase name and durations are written the humantime way.
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "name": "login",
//!       "mode": "COMBINATION",
//!       "algorithm": "token_bucket",
//!       "limit": 5,
//!       "window": "1m",
//!       "refillRate": 0.1,
//!       "trustedProxyDepth": 1,
//!       "identifier": { "header": "x-api-key" },
//!       "routes": ["/auth/login"],
//!       "failurePolicy": "open",
//!       "storeTimeout": "25ms"
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RateLimitError, Result};
use crate::key::{IdentifierKey, IpKey, KeyDerivation, LimitMode};
use crate::quota::Quota;

pub use crate::key::IdentifierSource;

/// Default time the dispatcher waits on an algorithm's backing store.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

/// How a backing-store failure or timeout is turned into a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request.
    Open,
    /// Deny the request.
    #[default]
    Closed,
}

/// Configuration for one protected resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Unique rule name.
    pub name: String,

    /// How the limiting key is derived.
    pub mode: LimitMode,

    /// Registered algorithm name.
    pub algorithm: String,

    /// Algorithm parameters.
    #[serde(flatten)]
    pub quota: Quota,

    /// Number of trusted proxies in front of the service.
    #[serde(default)]
    pub trusted_proxy_depth: usize,

    /// Source of the identifier for `KEY` and `COMBINATION` modes.
    #[serde(default)]
    pub identifier: IdentifierSource,

    /// Route patterns this rule protects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,

    /// Decision when the backing store fails or times out.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Bound on one backing-store call.
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl RuleConfig {
    /// Create a rule with default proxy depth, identifier and failure handling.
    pub fn new(
        name: impl Into<String>,
        mode: LimitMode,
        algorithm: impl Into<String>,
        quota: Quota,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            algorithm: algorithm.into(),
            quota,
            trusted_proxy_depth: 0,
            identifier: IdentifierSource::default(),
            routes: Vec::new(),
            failure_policy: FailurePolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Trust `depth` proxies when resolving the caller address.
    pub fn with_trusted_proxy_depth(mut self, depth: usize) -> Self {
        self.trusted_proxy_depth = depth;
        self
    }

    /// Read the identifier from `source`.
    pub fn with_identifier(mut self, source: IdentifierSource) -> Self {
        self.identifier = source;
        self
    }

    /// Protect a route pattern.
    ///
    /// Patterns support `*` for single segment and `**` for multiple segments.
    pub fn route(mut self, pattern: impl Into<String>) -> Self {
        self.routes.push(pattern.into());
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the backing-store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Key derivation for this rule's mode and extractors.
    pub fn key_derivation(&self) -> KeyDerivation {
        KeyDerivation::with_extractors(
            self.mode,
            IpKey::with_trusted_proxy_depth(self.trusted_proxy_depth),
            IdentifierKey::from_source(self.identifier.clone()),
        )
    }

    /// Check the rule for values no algorithm can work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> RateLimitError {
            ConfigError::InvalidRule {
                rule: self.name.clone(),
                reason: reason.to_string(),
            }
            .into()
        };

        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingRequired("rule name".into()).into());
        }
        // Storage keys are "{rule}/{limiting key}".
        if self.name.contains('/') {
            return Err(invalid("rule name must not contain '/'"));
        }
        if self.algorithm.trim().is_empty() {
            return Err(invalid("algorithm name is empty"));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("store timeout must be non-zero"));
        }
        if let IdentifierSource::Header(header) = &self.identifier
            && header.trim().is_empty()
        {
            return Err(invalid("identifier header name is empty"));
        }
        if self.routes.iter().any(|r| !r.starts_with('/')) {
            return Err(invalid("route patterns must start with '/'"));
        }
        if !self.routes.iter().all(|r| rest_wildcard_is_last(r)) {
            return Err(invalid("'**' may only be the last segment of a route pattern"));
        }
        self.quota.validate()
    }
}

fn rest_wildcard_is_last(pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    segments.iter().enumerate().all(|(i, segment)| {
        !segment.contains("**") || (*segment == "**" && i == segments.len() - 1)
    })
}

/// A set of rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Configured rules, in matching order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl RateLimitConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every rule and check that names are unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.name.as_str()) {
                return Err(RateLimitError::DuplicateRule(rule.name.clone()));
            }
        }
        Ok(())
    }
}
