//! Rate limiting algorithms.
//!
//! An `Algorithm` is stateless: it reads and writes per-key state through a
//! [`Storage`] and receives the current time from its caller, which keeps it
//! deterministic under a [`crate::clock::ManualClock`].
//!
//! # Available Algorithms
//!
//! | Algorithm | Registered name | Burst | Feature |
//! |-----------|-----------------|-------|---------|
//! | Token Bucket | `token_bucket` | Up to capacity | default |
//! | Sliding Window | `sliding_window` | Smoothed across boundary | default |
//! | Fixed Window | `fixed_window` | Up to 2x at boundary | `fixed-window` |
//! | GCRA | `gcra` | Up to capacity, evenly spaced | `gcra` |

#[cfg(feature = "fixed-window")]
mod fixed_window;
#[cfg(feature = "gcra")]
mod gcra;
mod sliding_window;
mod token_bucket;

#[cfg(feature = "fixed-window")]
pub use fixed_window::FixedWindow;
#[cfg(feature = "gcra")]
pub use gcra::Gcra;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use std::future::Future;

use crate::decision::Decision;
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::Storage;

/// Rate limiting algorithm.
///
/// `check_and_record` must perform its read-decide-write through
/// [`Storage::execute_atomic`] so that concurrent callers on one key never
/// admit more than the quota.
pub trait Algorithm: Send + Sync + 'static {
    /// Algorithm name, also its default registration name.
    fn name(&self) -> &'static str;

    /// Decide on a request at time `now` (Unix ms) and record it if admitted.
    fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Evaluate without consuming quota.
    fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Forget all state for a key.
    fn reset<S: Storage>(&self, storage: &S, key: &str) -> impl Future<Output = Result<()>> + Send {
        async move { storage.delete(key).await }
    }
}
