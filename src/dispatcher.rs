//! Rule dispatcher.
//!
//! The [`RateLimitDispatcher`] turns a request plus a named rule into an
//! admission decision:
//!
//! 1. derive the limiting key from the rule's mode;
//! 2. hand the key and the rule's quota to the algorithm the rule names;
//! 3. return the algorithm's decision, or resolve a backing-store failure
//!    through the rule's [`FailurePolicy`].
//!
//! Algorithms are resolved from the [`StrategyRegistry`] once, when rules are
//! activated, so an unknown algorithm name fails at startup and never during
//! a request. After activation the dispatcher is immutable and takes no locks.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strategy_ratelimit::prelude::*;
//!
//! let registry = Arc::new(StrategyRegistry::new());
//! register_builtin_algorithms(&registry, SystemClock::shared())?;
//!
//! let dispatcher = RateLimitDispatcher::builder(registry)
//!     .rule(RuleConfig::new("api", LimitMode::Ip, "sliding_window", Quota::per_minute(100)).route("/api/**"))
//!     .build()?;
//!
//! let request = RequestInfo::new().with_peer("203.0.113.7".parse()?);
//! let decision = dispatcher.check("api", &request).await?;
//! if !decision.allowed {
//!     // reject with decision.to_headers()
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{FailurePolicy, RateLimitConfig, RuleConfig};
use crate::decision::{Decision, RateLimitInfo};
use crate::error::{RateLimitError, Result};
use crate::key::{KeyDerivation, RequestContext};
use crate::limiter::{RateLimitAlgorithm, RateLimiter};
use crate::registry::StrategyRegistry;

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The algorithm evaluated the request.
    Evaluated,
    /// The backing store failed and the rule admits on failure.
    FailedOpen,
    /// The backing store failed and the rule denies on failure.
    FailedClosed,
}

/// Result of one rate-limit check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Suggested wait before retrying, for denied requests.
    pub retry_after_millis: Option<u64>,
    /// Key the request was counted under.
    pub limiting_key: String,
    /// Rule that was applied.
    pub rule: String,
    /// Whether the algorithm decided or a failure policy did.
    pub resolution: Resolution,
    /// Algorithm detail, absent when a failure policy decided.
    #[serde(skip)]
    pub info: Option<RateLimitInfo>,
}

impl AdmissionDecision {
    fn evaluated(rule: &ActiveRule, limiting_key: String, decision: Decision) -> Self {
        let allowed = decision.is_allowed();
        let info = decision.into_info();
        Self {
            allowed,
            retry_after_millis: if allowed { None } else { info.retry_after_millis() },
            limiting_key,
            rule: rule.name().to_string(),
            resolution: Resolution::Evaluated,
            info: Some(info),
        }
    }

    fn failed(rule: &ActiveRule, limiting_key: String) -> Self {
        let (allowed, resolution) = match rule.config.failure_policy {
            FailurePolicy::Open => (true, Resolution::FailedOpen),
            FailurePolicy::Closed => (false, Resolution::FailedClosed),
        };
        Self {
            allowed,
            retry_after_millis: None,
            limiting_key,
            rule: rule.name().to_string(),
            resolution,
            info: None,
        }
    }

    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Whether the request was rejected.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Response headers describing this decision.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        match &self.info {
            Some(info) => {
                let mut headers = info.to_headers();
                if self.allowed {
                    headers.retain(|(name, _)| *name != "Retry-After");
                }
                headers
            }
            None => Vec::new(),
        }
    }
}

/// A rule whose algorithm has been resolved.
pub struct ActiveRule {
    config: RuleConfig,
    limiter: Arc<dyn RateLimiter>,
    keys: KeyDerivation,
}

impl std::fmt::Debug for ActiveRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRule")
            .field("name", &self.config.name)
            .field("mode", &self.config.mode)
            .field("algorithm", &self.limiter.name())
            .finish()
    }
}

impl ActiveRule {
    fn activate(registry: &StrategyRegistry, config: RuleConfig) -> Result<Self> {
        config.validate()?;
        let limiter = registry.resolve::<RateLimitAlgorithm>(&config.algorithm)?;
        let keys = config.key_derivation();

        info!(
            rule = %config.name,
            mode = %config.mode,
            algorithm = %config.algorithm,
            "Activated rate limit rule"
        );

        Ok(Self {
            config,
            limiter,
            keys,
        })
    }

    /// Rule name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Rule configuration.
    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Name reported by the resolved algorithm.
    pub fn algorithm(&self) -> &'static str {
        self.limiter.name()
    }

    fn storage_key(&self, limiting_key: &str) -> String {
        format!("{}/{}", self.config.name, limiting_key)
    }

    fn derive_key<R: RequestContext>(&self, request: &R) -> Result<String> {
        self.keys.derive(request).inspect_err(|err| {
            warn!(rule = %self.config.name, error = %err, "Request lacks key material");
        })
    }
}

#[derive(Clone, Copy)]
enum Evaluation {
    Acquire,
    Peek,
}

/// Dispatches admission checks to the rules' algorithms.
#[derive(Debug)]
pub struct RateLimitDispatcher {
    rules: HashMap<String, ActiveRule>,
    exact_routes: HashMap<String, String>,
    route_patterns: Vec<(String, String)>,
}

impl RateLimitDispatcher {
    /// Start building a dispatcher that resolves algorithms from `registry`.
    pub fn builder(registry: Arc<StrategyRegistry>) -> RateLimitDispatcherBuilder {
        RateLimitDispatcherBuilder::new(registry)
    }

    /// Activate every rule in `config`.
    pub fn from_config(registry: Arc<StrategyRegistry>, config: RateLimitConfig) -> Result<Self> {
        Self::builder(registry).rules(config.rules).build()
    }

    /// Check a request against the named rule, consuming quota if admitted.
    ///
    /// Fails with `UnknownRule` for an unconfigured rule and with
    /// `MissingKeyMaterial` when the request cannot be keyed. Backing-store
    /// failures never surface here; the rule's failure policy decides.
    pub async fn check<R: RequestContext + Sync>(
        &self,
        rule: &str,
        request: &R,
    ) -> Result<AdmissionDecision> {
        let active = self.active(rule)?;
        self.evaluate(active, request, Evaluation::Acquire).await
    }

    /// Evaluate a request against the named rule without consuming quota.
    pub async fn peek<R: RequestContext + Sync>(
        &self,
        rule: &str,
        request: &R,
    ) -> Result<AdmissionDecision> {
        let active = self.active(rule)?;
        self.evaluate(active, request, Evaluation::Peek).await
    }

    /// Check a request against the first rule protecting `path`.
    ///
    /// Routes without wildcards are matched first, then patterns in rule
    /// order. Returns `None` when no rule protects the path.
    pub async fn check_route<R: RequestContext + Sync>(
        &self,
        path: &str,
        request: &R,
    ) -> Result<Option<AdmissionDecision>> {
        let Some(active) = self.rule_for_path(path) else {
            trace!(path, "No rate limit rule for path");
            return Ok(None);
        };
        self.evaluate(active, request, Evaluation::Acquire)
            .await
            .map(Some)
    }

    /// Clear the admission state of the request's key under the named rule.
    pub async fn reset<R: RequestContext + Sync>(&self, rule: &str, request: &R) -> Result<()> {
        let active = self.active(rule)?;
        let limiting_key = active.derive_key(request)?;
        let storage_key = active.storage_key(&limiting_key);

        debug!(rule, key = %limiting_key, "Resetting rate limit state");
        active.limiter.reset(&storage_key).await
    }

    /// The active rule with the given name.
    pub fn rule(&self, name: &str) -> Option<&ActiveRule> {
        self.rules.get(name)
    }

    /// Names of all active rules, sorted.
    pub fn rule_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The rule that protects `path`, if any.
    pub fn rule_for_path(&self, path: &str) -> Option<&ActiveRule> {
        if let Some(name) = self.exact_routes.get(path) {
            return self.rules.get(name);
        }

        self.route_patterns
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .and_then(|(_, name)| self.rules.get(name))
    }

    fn active(&self, rule: &str) -> Result<&ActiveRule> {
        self.rules
            .get(rule)
            .ok_or_else(|| RateLimitError::UnknownRule(rule.to_string()))
    }

    async fn evaluate<R: RequestContext + Sync>(
        &self,
        rule: &ActiveRule,
        request: &R,
        evaluation: Evaluation,
    ) -> Result<AdmissionDecision> {
        let limiting_key = rule.derive_key(request)?;
        let storage_key = rule.storage_key(&limiting_key);
        let quota = &rule.config.quota;
        let timeout = rule.config.store_timeout;

        let pending = match evaluation {
            Evaluation::Acquire => rule.limiter.acquire(&storage_key, quota),
            Evaluation::Peek => rule.limiter.peek(&storage_key, quota),
        };

        let error = match tokio::time::timeout(timeout, pending).await {
            Ok(Ok(decision)) => {
                let decision = AdmissionDecision::evaluated(rule, limiting_key, decision);
                if decision.allowed {
                    trace!(rule = %decision.rule, key = %decision.limiting_key, "Request admitted");
                } else {
                    debug!(
                        rule = %decision.rule,
                        key = %decision.limiting_key,
                        retry_after_ms = ?decision.retry_after_millis,
                        "Request rate limited"
                    );
                }
                return Ok(decision);
            }
            Ok(Err(err @ RateLimitError::Storage(_))) => err,
            Ok(Err(err)) => return Err(err),
            Err(_) => RateLimitError::BackingStoreTimeout(timeout),
        };

        let decision = AdmissionDecision::failed(rule, limiting_key);
        warn!(
            rule = %decision.rule,
            key = %decision.limiting_key,
            error = %error,
            resolution = ?decision.resolution,
            "Backing store failed, applied failure policy"
        );
        Ok(decision)
    }
}

/// Builder for [`RateLimitDispatcher`].
#[derive(Debug)]
pub struct RateLimitDispatcherBuilder {
    registry: Arc<StrategyRegistry>,
    rules: Vec<RuleConfig>,
}

impl RateLimitDispatcherBuilder {
    /// Create a new builder.
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self {
            registry,
            rules: Vec::new(),
        }
    }

    /// Add a rule.
    pub fn rule(mut self, rule: RuleConfig) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add several rules.
    pub fn rules(mut self, rules: impl IntoIterator<Item = RuleConfig>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Activate all rules.
    ///
    /// Fails on the first rule that is invalid, reuses a name, or names an
    /// algorithm that is not registered.
    pub fn build(self) -> Result<RateLimitDispatcher> {
        let mut rules = HashMap::with_capacity(self.rules.len());
        let mut exact_routes = HashMap::new();
        let mut route_patterns = Vec::new();

        for config in self.rules {
            if rules.contains_key(&config.name) {
                return Err(RateLimitError::DuplicateRule(config.name));
            }

            let active = ActiveRule::activate(&self.registry, config)?;
            for route in &active.config.routes {
                if route.contains('*') {
                    route_patterns.push((route.clone(), active.config.name.clone()));
                } else {
                    exact_routes
                        .entry(route.clone())
                        .or_insert_with(|| active.config.name.clone());
                }
            }
            rules.insert(active.config.name.clone(), active);
        }

        Ok(RateLimitDispatcher {
            rules,
            exact_routes,
            route_patterns,
        })
    }
}

/// Check if a pattern matches a path.
///
/// Simple glob-style matching:
/// - `*` matches any single path segment
/// - `**` matches the rest of the path; rule validation keeps it last
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut pi = 0;
    let mut pa = 0;

    while pi < pattern_parts.len() {
        let p = pattern_parts[pi];
        if p == "**" {
            return true;
        }
        if pa == path_parts.len() || (p != "*" && p != path_parts[pa]) {
            return false;
        }
        pi += 1;
        pa += 1;
    }

    pa == path_parts.len()
}
