//! Fixed Window rate limiting algorithm.

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::{Storage, StorageEntry};

/// Fixed Window rate limiting algorithm.
///
/// Time is cut into windows aligned to multiples of the window length. Each
/// window admits `limit` requests; the counter restarts at the boundary, so
/// up to twice the limit can pass around it.
#[derive(Debug, Clone, Default)]
pub struct FixedWindow;

impl FixedWindow {
    /// Create a new Fixed Window algorithm instance.
    pub fn new() -> Self {
        Self
    }

    fn current_count(entry: Option<&StorageEntry>, window_start: u64) -> u64 {
        match entry {
            Some(e) if e.window_start == window_start => e.count,
            _ => 0,
        }
    }

    fn build_info(count: u64, quota: &Quota, window_end: u64, now: u64, allowed: bool) -> RateLimitInfo {
        let reset_after = Duration::from_millis(window_end - now);
        let info = RateLimitInfo::new(quota.limit(), quota.limit().saturating_sub(count), reset_after)
            .with_algorithm("fixed_window");

        if allowed {
            info
        } else {
            info.with_retry_after(reset_after.max(Duration::from_millis(1)))
        }
    }
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> Result<Decision> {
        let window_ms = quota.window_ms();
        let window_start = now - now % window_ms;
        let window_end = window_start + window_ms;

        storage
            .execute_atomic(key, Duration::from_millis(window_ms), |entry| {
                let mut count = Self::current_count(entry.as_ref(), window_start);
                let allowed = count < quota.limit();
                if allowed {
                    count += 1;
                }

                let info = Self::build_info(count, quota, window_end, now, allowed);
                (
                    StorageEntry::new(count, window_start).set_last_update(now),
                    Decision::from_outcome(allowed, info),
                )
            })
            .await
    }

    async fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> Result<Decision> {
        let window_ms = quota.window_ms();
        let window_start = now - now % window_ms;

        let entry = storage.get(key).await?;
        let count = Self::current_count(entry.as_ref(), window_start);
        let allowed = count < quota.limit();

        Ok(Decision::from_outcome(
            allowed,
            Self::build_info(count, quota, window_start + window_ms, now, allowed),
        ))
    }
}
