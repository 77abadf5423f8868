//! Storage backend trait and the in-memory implementation.
//!
//! Algorithms keep their per-key state in a `Storage`. Every algorithm
//! instance registered by [`crate::limiter::register_builtin_algorithms`]
//! owns a storage of its own.

mod entry;
#[cfg(feature = "memory")]
mod memory_gc;

pub use entry::StorageEntry;

#[cfg(feature = "memory")]
pub use memory_gc::{GcConfig, GcInterval, MemoryStorage};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Storage backend for per-key admission state.
///
/// Operations are async so that shared backends (a distributed cache) fit the
/// same seam as the in-memory map. Implementations must be thread-safe.
///
/// `execute_atomic` is the operation algorithms rely on: the read, the
/// decision and the write happen as one step with respect to other callers
/// of the same key. A backend that cannot guarantee that cannot back an
/// algorithm without letting more requests through than the quota allows.
pub trait Storage: Send + Sync + 'static {
    /// Get an entry by key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<StorageEntry>>> + Send;

    /// Delete an entry.
    ///
    /// Returns success even if the key didn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Atomic read-modify-write.
    ///
    /// `operation` receives the live entry (if any) and returns the entry to
    /// store together with a result value.
    fn execute_atomic<F, T>(
        &self,
        key: &str,
        ttl: Duration,
        operation: F,
    ) -> impl Future<Output = Result<T>> + Send
    where
        F: FnOnce(Option<StorageEntry>) -> (StorageEntry, T) + Send,
        T: Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn execute_atomic<F, T>(&self, key: &str, ttl: Duration, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> (StorageEntry, T) + Send,
        T: Send,
    {
        (**self).execute_atomic(key, ttl, operation).await
    }
}
