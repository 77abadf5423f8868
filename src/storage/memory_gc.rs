//! In-memory storage with expiry and garbage collection.
//!
//! Entries live in a `DashMap`. Expired entries are invisible to readers
//! immediately and are physically removed by garbage collection, either
//! every N operations or from a background task on a fixed interval. An
//! entry is never removed before the TTL its writer gave it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::Result;
use crate::storage::{Storage, StorageEntry};

/// Garbage collection interval configuration.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Run GC every N operations.
    Requests(u64),
    /// Run GC at fixed time intervals (needs a Tokio runtime).
    Duration(Duration),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with operation-count GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

#[derive(Debug, Clone)]
struct InternalEntry {
    entry: StorageEntry,
    expires_at: u64,
}

/// In-memory storage.
///
/// `execute_atomic` holds the key's shard lock for the whole
/// read-decide-write step, so concurrent callers on one key are serialized.
///
/// # Example
///
/// ```ignore
/// use strategy_ratelimit::storage::{MemoryStorage, GcConfig};
/// use std::time::Duration;
///
/// // Default GC (every 10000 operations)
/// let storage = MemoryStorage::new();
///
/// // Background GC every minute
/// let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_secs(60)));
/// ```
pub struct MemoryStorage {
    data: Arc<DashMap<String, InternalEntry>>,
    gc_config: GcConfig,
    clock: SharedClock,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        Self::with_gc_and_clock(gc_config, SystemClock::shared())
    }

    /// Create a memory storage that reads time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self::with_gc_and_clock(GcConfig::default(), clock)
    }

    /// Create a memory storage with both GC configuration and clock.
    pub fn with_gc_and_clock(gc_config: GcConfig, clock: SharedClock) -> Self {
        let storage = Self {
            data: Arc::new(DashMap::new()),
            gc_config,
            clock,
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        };

        if let GcInterval::Duration(interval) = storage.gc_config.interval {
            storage.start_gc_task(interval);
        }

        storage
    }

    fn start_gc_task(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime available, interval GC disabled");
            return;
        };

        let data = self.data.clone();
        let clock = self.clock.clone();
        let shutdown = self.shutdown.clone();

        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        run_gc_on_map(&data, clock.now_ms());
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
        });
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn run_gc(&self) -> usize {
        run_gc_on_map(&self.data, self.clock.now_ms())
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count > 0 && count % threshold == 0 {
                if let Some(_guard) = self.gc_lock.try_lock() {
                    self.run_gc();
                }
            }
        }
    }

    fn expiry(&self, now: u64, ttl: Duration) -> u64 {
        now.saturating_add(ttl.as_millis() as u64)
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

fn run_gc_on_map(data: &DashMap<String, InternalEntry>, now: u64) -> usize {
    let before = data.len();

    data.retain(|_, internal| internal.expires_at > now);

    let removed = before.saturating_sub(data.len());
    if removed > 0 {
        trace!(removed, "Memory storage GC");
    }
    removed
}

impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        self.maybe_run_gc();

        let now = self.clock.now_ms();
        Ok(self
            .data
            .get(key)
            .filter(|internal| internal.expires_at > now)
            .map(|internal| internal.entry.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn execute_atomic<F, T>(&self, key: &str, ttl: Duration, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> (StorageEntry, T) + Send,
        T: Send,
    {
        self.maybe_run_gc();

        let now = self.clock.now_ms();
        let expires_at = self.expiry(now, ttl);

        // The entry guard holds the shard lock until the new state is written.
        let result = match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get();
                let current = (live.expires_at > now).then(|| live.entry.clone());
                let (entry, result) = operation(current);
                occupied.insert(InternalEntry { entry, expires_at });
                result
            }
            Entry::Vacant(vacant) => {
                let (entry, result) = operation(None);
                vacant.insert(InternalEntry { entry, expires_at });
                result
            }
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    async fn put(storage: &MemoryStorage, key: &str, entry: StorageEntry, ttl: Duration) {
        storage.execute_atomic(key, ttl, |_| (entry, ())).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();

        let entry = StorageEntry::new(5, 1000);
        put(&storage, "key1", entry.clone(), Duration::from_secs(60)).await;

        let result = storage.get("key1").await.unwrap();
        assert_eq!(result, Some(entry));

        storage.delete("key1").await.unwrap();
        assert!(storage.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_expiration() {
        let clock = ManualClock::shared(10_000);
        let storage = MemoryStorage::with_clock(clock.clone());

        put(&storage, "key1", StorageEntry::new(5, 10_000), Duration::from_millis(10)).await;

        clock.advance(Duration::from_millis(20));
        assert!(storage.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_atomic_ignores_expired_state() {
        let clock = ManualClock::shared(0);
        let storage = MemoryStorage::with_clock(clock.clone());
        let bump = |current: Option<StorageEntry>| {
            let count = current.map(|e| e.count).unwrap_or(0) + 1;
            (StorageEntry::new(count, 0), count)
        };

        assert_eq!(storage.execute_atomic("k", Duration::from_secs(1), bump).await.unwrap(), 1);
        assert_eq!(storage.execute_atomic("k", Duration::from_secs(1), bump).await.unwrap(), 2);

        clock.advance(Duration::from_secs(2));
        assert_eq!(storage.execute_atomic("k", Duration::from_secs(1), bump).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_execute_atomic_serializes_callers() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handles = Vec::new();

        for _ in 0..200 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .execute_atomic("shared", Duration::from_secs(60), |current| {
                        let count = current.map(|e| e.count).unwrap_or(0) + 1;
                        (StorageEntry::new(count, 0), ())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(storage.get("shared").await.unwrap().unwrap().count, 200);
    }

    #[tokio::test]
    async fn test_manual_gc_removes_expired() {
        let clock = ManualClock::shared(0);
        let storage = MemoryStorage::with_gc_and_clock(GcConfig::manual(), clock.clone());

        put(&storage, "short", StorageEntry::new(1, 0), Duration::from_secs(1)).await;
        put(&storage, "long", StorageEntry::new(1, 0), Duration::from_secs(600)).await;

        clock.advance(Duration::from_secs(5));
        assert_eq!(storage.run_gc(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_gc_keeps_idle_entries_until_expiry() {
        let clock = ManualClock::shared(0);
        let storage = MemoryStorage::with_gc_and_clock(GcConfig::manual(), clock.clone());

        // Written once, then left alone for most of a day.
        put(&storage, "daily", StorageEntry::new(1, 0), Duration::from_secs(86_400)).await;

        clock.advance(Duration::from_secs(20 * 3600));
        assert_eq!(storage.run_gc(), 0);
        assert_eq!(storage.get("daily").await.unwrap().map(|e| e.count), Some(1));

        clock.advance(Duration::from_secs(4 * 3600));
        assert_eq!(storage.run_gc(), 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_gc_config() {
        let config = GcConfig::on_requests(1000);
        assert!(matches!(config.interval, GcInterval::Requests(1000)));
        assert!(matches!(GcConfig::default().interval, GcInterval::Requests(10000)));
    }
}
