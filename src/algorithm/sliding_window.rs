//! Sliding Window rate limiting algorithm.

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::{Storage, StorageEntry};

/// Sliding Window rate limiting algorithm.
///
/// Counts admissions per fixed window and weights the previous window's
/// count by how much of it still overlaps the sliding window:
///
/// ```text
/// weighted = current + previous * (1 - elapsed_in_window / window)
/// ```
///
/// A request is admitted while `weighted + 1 <= limit`, which removes the
/// double burst a plain fixed window allows at the boundary.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow;

struct WindowState {
    window_start: u64,
    current: u64,
    previous: u64,
    weighted: f64,
}

impl SlidingWindow {
    /// Create a new Sliding Window algorithm instance.
    pub fn new() -> Self {
        Self
    }

    fn state(&self, entry: Option<&StorageEntry>, window_ms: u64, now: u64) -> WindowState {
        let window_start = now - now % window_ms;
        let (current, previous) = match entry {
            Some(e) if e.window_start == window_start => (e.count, e.prev_count.unwrap_or(0)),
            // Stored window is the one just before: it becomes the previous window.
            Some(e) if e.window_start + window_ms == window_start => (0, e.count),
            _ => (0, 0),
        };

        let progress = (now - window_start) as f64 / window_ms as f64;
        let weighted = current as f64 + previous as f64 * (1.0 - progress);

        WindowState {
            window_start,
            current,
            previous,
            weighted,
        }
    }

    fn build_info(&self, state: &WindowState, quota: &Quota, window_ms: u64, now: u64) -> RateLimitInfo {
        let limit = quota.limit();
        let remaining = (limit as f64 - state.weighted).max(0.0).floor() as u64;
        let until_rollover = state.window_start + window_ms - now;

        RateLimitInfo::new(limit, remaining, Duration::from_millis(until_rollover))
            .with_algorithm("sliding_window")
            .with_metadata(DecisionMetadata::new().with_weighted_count(state.weighted))
    }
}

impl Algorithm for SlidingWindow {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> Result<Decision> {
        let window_ms = quota.window_ms();
        let ttl = Duration::from_millis(window_ms * 2);
        let limit = quota.limit() as f64;

        storage
            .execute_atomic(key, ttl, |entry| {
                let mut state = self.state(entry.as_ref(), window_ms, now);
                let allowed = state.weighted + 1.0 <= limit;
                if allowed {
                    state.current += 1;
                    state.weighted += 1.0;
                }

                let new_entry = StorageEntry::new(state.current, state.window_start)
                    .set_prev_count(state.previous)
                    .set_last_update(now);

                let mut info = self.build_info(&state, quota, window_ms, now);
                if !allowed {
                    // Earliest point at which the previous window's weight has decayed.
                    let wait = (state.window_start + window_ms - now).max(1);
                    info = info.with_retry_after(Duration::from_millis(wait));
                }

                (new_entry, Decision::from_outcome(allowed, info))
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
        let entry = storage.get(key).await?;
        let state = self.state(entry.as_ref(), window_ms, now);

        let allowed = state.weighted + 1.0 <= quota.limit() as f64;
        let info = self.build_info(&state, quota, window_ms, now);

        Ok(if allowed {
            Decision::allowed(info)
        } else {
            let wait = (state.window_start + window_ms - now).max(1);
            Decision::denied(info.with_retry_after(Duration::from_millis(wait)))
        })
    }
}
