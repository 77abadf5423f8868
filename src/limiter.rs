//! The "rate-limit algorithm" capability.
//!
//! [`Algorithm`] is generic over its storage and cannot be stored behind a
//! trait object. [`AlgorithmLimiter`] binds one algorithm to the storage that
//! owns its admission state and to a clock, and exposes the result through the
//! object-safe [`RateLimiter`] trait that the registry stores under
//! [`RateLimitAlgorithm`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::algorithm::Algorithm;
use crate::clock::{SharedClock, SystemClock};
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::quota::Quota;
use crate::registry::{Capability, StrategyRegistry};
use crate::storage::Storage;

/// Boxed future returned by [`RateLimiter`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A named admission-decision strategy with its own per-key state.
pub trait RateLimiter: Send + Sync + 'static {
    /// Algorithm name, for logs and decisions.
    fn name(&self) -> &'static str;

    /// Decide on one request for `key` and consume quota if admitted.
    fn acquire<'a>(&'a self, key: &'a str, quota: &'a Quota) -> BoxFuture<'a, Result<Decision>>;

    /// Evaluate `key` without consuming quota.
    fn peek<'a>(&'a self, key: &'a str, quota: &'a Quota) -> BoxFuture<'a, Result<Decision>>;

    /// Forget all state for `key`.
    fn reset<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Capability marker for rate-limit algorithms.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitAlgorithm;

impl Capability for RateLimitAlgorithm {
    const NAME: &'static str = "rate-limit algorithm";
    type Strategy = dyn RateLimiter;
}

/// An [`Algorithm`] bound to its storage and clock.
#[derive(Debug)]
pub struct AlgorithmLimiter<A, S> {
    algorithm: A,
    storage: S,
    clock: SharedClock,
}

impl<A: Algorithm, S: Storage> AlgorithmLimiter<A, S> {
    /// Bind `algorithm` to `storage`, reading time from the system clock.
    pub fn new(algorithm: A, storage: S) -> Self {
        Self {
            algorithm,
            storage,
            clock: SystemClock::shared(),
        }
    }

    /// Read time from `clock` instead.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The storage holding this limiter's admission state.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<A: Algorithm, S: Storage> RateLimiter for AlgorithmLimiter<A, S> {
    fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    fn acquire<'a>(&'a self, key: &'a str, quota: &'a Quota) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.algorithm
                .check_and_record(&self.storage, key, quota, now)
                .await
        })
    }

    fn peek<'a>(&'a self, key: &'a str, quota: &'a Quota) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.algorithm.check(&self.storage, key, quota, now).await
        })
    }

    fn reset<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.algorithm.reset(&self.storage, key).await })
    }
}

/// Admits everything and keeps no state.
///
/// Intended as the fallback passed to
/// [`StrategyRegistry::resolve_or_default`] where a caller explicitly wants
/// an unknown algorithm to mean "not limited".
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl RateLimiter for Unrestricted {
    fn name(&self) -> &'static str {
        "unrestricted"
    }

    fn acquire<'a>(&'a self, key: &'a str, quota: &'a Quota) -> BoxFuture<'a, Result<Decision>> {
        self.peek(key, quota)
    }

    fn peek<'a>(&'a self, key: &'a str, quota: &'a Quota) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            debug!(key, "Unrestricted limiter admitted request");
            let info = RateLimitInfo::new(quota.limit(), quota.limit(), Duration::ZERO)
                .with_algorithm("unrestricted");
            Ok(Decision::allowed(info))
        })
    }

    fn reset<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Register every compiled-in algorithm under its own name.
///
/// Each algorithm gets a dedicated [`MemoryStorage`](crate::storage::MemoryStorage),
/// and both the algorithm and its storage read time from `clock`.
#[cfg(feature = "memory")]
pub fn register_builtin_algorithms(registry: &StrategyRegistry, clock: SharedClock) -> Result<()> {
    use crate::algorithm::{SlidingWindow, TokenBucket};
    use crate::storage::MemoryStorage;

    fn register<A: Algorithm>(registry: &StrategyRegistry, algorithm: A, clock: &SharedClock) -> Result<()> {
        let name = algorithm.name();
        let storage = MemoryStorage::with_clock(clock.clone());
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(AlgorithmLimiter::new(algorithm, storage).with_clock(clock.clone()));
        registry.register::<RateLimitAlgorithm>(name, limiter)
    }

    register(registry, TokenBucket::new(), &clock)?;
    register(registry, SlidingWindow::new(), &clock)?;
    #[cfg(feature = "fixed-window")]
    register(registry, crate::algorithm::FixedWindow::new(), &clock)?;
    #[cfg(feature = "gcra")]
    register(registry, crate::algorithm::Gcra::new(), &clock)?;
    Ok(())
}
