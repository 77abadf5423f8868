//! GCRA (Generic Cell Rate Algorithm) implementation.
//!
//! GCRA tracks a Theoretical Arrival Time (TAT) per key instead of a counter.
//! Each admitted request pushes the TAT one emission period further; a
//! request is admitted while the TAT stays within the burst tolerance of now.
//!
//! ```text
//! Period: 100ms between requests (10/sec)
//! Capacity: 3 (burst tolerance = 2 periods = 200ms)
//!
//! Time 0ms:   TAT = max(0, 0) + 100 = 100,   offset 100 <= 300. ALLOWED
//! Time 10ms:  TAT = max(100, 10) + 100 = 200, offset 190 <= 300. ALLOWED
//! Time 20ms:  TAT = max(200, 20) + 100 = 300, offset 280 <= 300. ALLOWED
//! Time 30ms:  TAT would be 400,               offset 370 >  300. DENIED
//! Time 350ms: TAT = max(300, 350) + 100 = 450.                   ALLOWED
//! ```

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::{Storage, StorageEntry};

const NANOS_PER_MS: u64 = 1_000_000;

/// GCRA rate limiter.
///
/// Reads the emission period (`window / limit`) and uses `capacity` as the
/// number of requests that may arrive back to back. Arrival times are kept
/// in nanoseconds so rates above one request per millisecond keep their
/// full burst and spacing.
#[derive(Debug, Clone, Default)]
pub struct Gcra;

/// Emission period and burst tolerance of a quota, in nanoseconds.
#[derive(Debug, Clone, Copy)]
struct Spacing {
    period: u64,
    max_offset: u64,
}

impl Spacing {
    fn of(quota: &Quota) -> Self {
        Self {
            period: (quota.period().as_nanos() as u64).max(1),
            max_offset: quota.max_tat_offset().as_nanos() as u64,
        }
    }

    /// Time the stored state stays relevant: the furthest a TAT can run ahead.
    fn ttl(&self) -> Duration {
        let nanos = self.max_offset.saturating_add(self.period.saturating_mul(2));
        Duration::from_millis(nanos.div_ceil(NANOS_PER_MS))
    }
}

impl Gcra {
    /// Create a new GCRA algorithm instance.
    pub fn new() -> Self {
        Self
    }

    /// Returns whether the request fits and the TAT to store.
    fn calculate_decision(current_tat: Option<u64>, now: u64, spacing: Spacing) -> (bool, u64) {
        let effective_tat = current_tat.unwrap_or(now).max(now);
        let new_tat = effective_tat.saturating_add(spacing.period);

        if new_tat - now <= spacing.max_offset.saturating_add(spacing.period) {
            (true, new_tat)
        } else {
            (false, effective_tat)
        }
    }

    fn build_info(tat: u64, now: u64, quota: &Quota, spacing: Spacing, allowed: bool) -> RateLimitInfo {
        let limit = quota.effective_capacity();

        let tat_offset = tat.saturating_sub(now);
        let remaining = limit.saturating_sub(tat_offset.div_ceil(spacing.period));

        let mut info = RateLimitInfo::new(limit, remaining, Duration::from_nanos(tat_offset))
            .with_algorithm("gcra")
            .with_metadata(DecisionMetadata::new().with_tat(tat));

        if !allowed {
            let wait_ms = tat_offset
                .saturating_sub(spacing.max_offset)
                .div_ceil(NANOS_PER_MS)
                .max(1);
            info = info.with_retry_after(Duration::from_millis(wait_ms));
        }

        info
    }
}

impl Algorithm for Gcra {
    fn name(&self) -> &'static str {
        "gcra"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> Result<Decision> {
        let spacing = Spacing::of(quota);
        let now_ns = now.saturating_mul(NANOS_PER_MS);

        storage
            .execute_atomic(key, spacing.ttl(), |entry| {
                let current_tat = entry.and_then(|e| e.tat);
                let (allowed, new_tat) = Self::calculate_decision(current_tat, now_ns, spacing);
                let info = Self::build_info(new_tat, now_ns, quota, spacing, allowed);

                (
                    StorageEntry::with_tat(new_tat, now),
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
        let spacing = Spacing::of(quota);
        let now_ns = now.saturating_mul(NANOS_PER_MS);

        let entry = storage.get(key).await?;
        let current_tat = entry.and_then(|e| e.tat);

        let (allowed, _) = Self::calculate_decision(current_tat, now_ns, spacing);
        let tat = current_tat.unwrap_or(now_ns).max(now_ns);
        let info = Self::build_info(tat, now_ns, quota, spacing, allowed);

        Ok(Decision::from_outcome(allowed, info))
    }
}
