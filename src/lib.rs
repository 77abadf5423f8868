//! Named strategy registry and rate-limit dispatcher.
//!
//! `strategy_ratelimit` picks one behaviour out of a registered set by name
//! and applies that mechanism to rate limiting:
//!
//! - **Strategy Registry**: a typed `(capability, name) -> implementation`
//!   table with explicit duplicate and not-found errors
//! - **Dispatcher**: derives a limiting key by mode (`IP`, `KEY`,
//!   `COMBINATION`), delegates to the rule's algorithm and resolves
//!   backing-store failures through an explicit fail-open/fail-closed policy
//! - **Algorithms**: Token Bucket, Sliding Window, Fixed Window and GCRA,
//!   each owning its per-key state in an atomic in-memory store
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use strategy_ratelimit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(StrategyRegistry::new());
//!     register_builtin_algorithms(&registry, SystemClock::shared())?;
//!
//!     let dispatcher = RateLimitDispatcher::builder(registry)
//!         .rule(RuleConfig::new("login", LimitMode::Combination, "token_bucket", Quota::token_bucket(5, 1.0)))
//!         .build()?;
//!
//!     let request = RequestInfo::new()
//!         .with_peer("203.0.113.7".parse().unwrap())
//!         .with_principal("alice");
//!
//!     let decision = dispatcher.check("login", &request).await?;
//!     if decision.allowed {
//!         println!("Request allowed under {}", decision.limiting_key);
//!     } else {
//!         println!("Rate limited! Retry after {:?}ms", decision.retry_after_millis);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Registered name | Feature Flag |
//! |-----------|-----------------|--------------|
//! | Token Bucket | `token_bucket` | default |
//! | Sliding Window | `sliding_window` | default |
//! | Fixed Window | `fixed_window` | `fixed-window` |
//! | GCRA | `gcra` | `gcra` |
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection
//! - `all-algorithms` (default): `fixed-window` and `gcra`

pub mod algorithm;
pub mod clock;
pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod key;
pub mod limiter;
pub mod quota;
pub mod registry;
pub mod storage;

// Re-export main types
pub use algorithm::Algorithm;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{FailurePolicy, IdentifierSource, RateLimitConfig, RuleConfig};
pub use decision::{Decision, DecisionMetadata, RateLimitInfo};
pub use dispatcher::{
    ActiveRule, AdmissionDecision, RateLimitDispatcher, RateLimitDispatcherBuilder, Resolution,
};
pub use error::{ConfigError, RateLimitError, Result, StorageError};
pub use key::{
    CompositeKey, IdentifierKey, IpKey, Key, KeyDerivation, LimitMode, RequestContext, RequestInfo,
};
pub use limiter::{AlgorithmLimiter, RateLimitAlgorithm, RateLimiter, Unrestricted};
pub use quota::Quota;
pub use registry::{Capability, DuplicatePolicy, StrategyRegistry};
pub use storage::{Storage, StorageEntry};

// Re-export algorithms
pub use algorithm::{SlidingWindow, TokenBucket};

#[cfg(feature = "fixed-window")]
pub use algorithm::FixedWindow;

#[cfg(feature = "gcra")]
pub use algorithm::Gcra;

#[cfg(feature = "memory")]
pub use limiter::register_builtin_algorithms;

// Re-export storage types
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::clock::{ManualClock, SystemClock};
    pub use crate::config::{FailurePolicy, IdentifierSource, RateLimitConfig, RuleConfig};
    pub use crate::dispatcher::{AdmissionDecision, RateLimitDispatcher, Resolution};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::key::{LimitMode, RequestInfo};
    pub use crate::limiter::{RateLimitAlgorithm, RateLimiter};
    pub use crate::quota::Quota;
    pub use crate::registry::{Capability, StrategyRegistry};

    #[cfg(feature = "memory")]
    pub use crate::limiter::register_builtin_algorithms;
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::Arc;

    use crate::prelude::*;

    #[tokio::test]
    async fn test_integration_combination_mode() {
        let registry = Arc::new(StrategyRegistry::new());
        register_builtin_algorithms(&registry, ManualClock::shared(1_000_000)).unwrap();

        let dispatcher = RateLimitDispatcher::builder(registry)
            .rule(RuleConfig::new(
                "login",
                LimitMode::Combination,
                "token_bucket",
                Quota::token_bucket(2, 1.0),
            ))
            .build()
            .unwrap();

        let request = RequestInfo::new()
            .with_peer("203.0.113.7".parse().unwrap())
            .with_principal("alice");

        let decision = dispatcher.check("login", &request).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limiting_key, "ip:203.0.113.7|key:alice");
        assert_eq!(decision.info.as_ref().map(|i| i.remaining), Some(1));
    }
}
