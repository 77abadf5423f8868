//! Token Bucket rate limiting algorithm.

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::{Storage, StorageEntry};

/// Token Bucket rate limiting algorithm.
///
/// The bucket holds up to `capacity` tokens and refills continuously at
/// `refill_rate` tokens per second. Each admitted request takes one token.
/// A denied request carries `retry_after` = time until the next whole token.
#[derive(Debug, Clone, Default)]
pub struct TokenBucket;

impl TokenBucket {
    /// Create a new Token Bucket algorithm instance.
    pub fn new() -> Self {
        Self
    }

    /// Tokens in the bucket at `now`, given the stored state.
    fn refill(&self, entry: Option<&StorageEntry>, quota: &Quota, now: u64) -> f64 {
        let capacity = quota.effective_capacity() as f64;
        let Some(entry) = entry else {
            return capacity;
        };

        let tokens = entry.tokens.unwrap_or(capacity);
        let elapsed_ms = now.saturating_sub(entry.last_update);
        let refill = elapsed_ms as f64 / 1000.0 * quota.effective_refill_rate();
        (tokens + refill).min(capacity)
    }

    fn build_info(&self, tokens: f64, quota: &Quota) -> RateLimitInfo {
        let capacity = quota.effective_capacity();
        let refill_rate = quota.effective_refill_rate();
        let remaining = tokens.floor() as u64;

        let missing = capacity as f64 - tokens;
        let time_to_full = if missing > 0.0 {
            (missing / refill_rate * 1000.0).ceil() as u64
        } else {
            0
        };

        let mut info = RateLimitInfo::new(capacity, remaining, Duration::from_millis(time_to_full))
            .with_algorithm("token_bucket")
            .with_metadata(DecisionMetadata::new().with_tokens_available(tokens));

        if tokens < 1.0 {
            let wait_ms = ((1.0 - tokens) / refill_rate * 1000.0).ceil() as u64;
            info = info.with_retry_after(Duration::from_millis(wait_ms.max(1)));
        }

        info
    }

    fn ttl(&self, quota: &Quota) -> Duration {
        let capacity = quota.effective_capacity() as f64;
        let ttl_ms = (capacity / quota.effective_refill_rate() * 1000.0 * 2.0) as u64;
        Duration::from_millis(ttl_ms.max(1000))
    }
}

impl Algorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now: u64,
    ) -> Result<Decision> {
        storage
            .execute_atomic(key, self.ttl(quota), |entry| {
                let mut tokens = self.refill(entry.as_ref(), quota, now);
                let allowed = tokens >= 1.0;
                if allowed {
                    tokens -= 1.0;
                }

                let info = self.build_info(tokens, quota);
                (
                    StorageEntry::with_tokens(tokens, now),
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
        let entry = storage.get(key).await?;
        let tokens = self.refill(entry.as_ref(), quota, now);
        let info = self.build_info(tokens, quota);

        Ok(Decision::from_outcome(tokens >= 1.0, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const T0: u64 = 1_000_000;

    #[tokio::test]
    async fn test_token_bucket_capacity_then_deny() {
        let algorithm = TokenBucket::new();
        let storage = MemoryStorage::new();
        let quota = Quota::token_bucket(5, 1.0);

        for i in 1..=5 {
            let decision = algorithm.check_and_record(&storage, "user:1", &quota, T0).await.unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
            assert_eq!(decision.info().remaining, 5 - i);
        }

        let decision = algorithm.check_and_record(&storage, "user:1", &quota, T0).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().retry_after_millis(), Some(1000));
    }

    #[tokio::test]
    async fn test_token_bucket_refills_one_token() {
        let algorithm = TokenBucket::new();
        let storage = MemoryStorage::new();
        let quota = Quota::token_bucket(5, 1.0);

        for _ in 0..6 {
            algorithm.check_and_record(&storage, "user:1", &quota, T0).await.unwrap();
        }

        let later = T0 + 1000;
        let decision = algorithm.check_and_record(&storage, "user:1", &quota, later).await.unwrap();
        assert!(decision.is_allowed());

        let decision = algorithm.check_and_record(&storage, "user:1", &quota, later).await.unwrap();
        assert!(decision.is_denied());
    }

    #[tokio::test]
    async fn test_token_bucket_partial_refill_retry_after() {
        let algorithm = TokenBucket::new();
        let storage = MemoryStorage::new();
        let quota = Quota::token_bucket(1, 2.0);

        algorithm.check_and_record(&storage, "k", &quota, T0).await.unwrap();

        // Half a token after 250ms at 2 tokens/s; the other half takes 250ms more.
        let decision = algorithm.check_and_record(&storage, "k", &quota, T0 + 250).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().retry_after_millis(), Some(250));
    }

    #[tokio::test]
    async fn test_token_bucket_check_does_not_consume() {
        let algorithm = TokenBucket::new();
        let storage = MemoryStorage::new();
        let quota = Quota::token_bucket(1, 1.0);

        for _ in 0..3 {
            let decision = algorithm.check(&storage, "k", &quota, T0).await.unwrap();
            assert!(decision.is_allowed());
        }

        algorithm.check_and_record(&storage, "k", &quota, T0).await.unwrap();
        let decision = algorithm.check(&storage, "k", &quota, T0).await.unwrap();
        assert!(decision.is_denied());
    }

    #[tokio::test]
    async fn test_token_bucket_reset() {
        let algorithm = TokenBucket::new();
        let storage = MemoryStorage::new();
        let quota = Quota::token_bucket(1, 0.1);

        algorithm.check_and_record(&storage, "k", &quota, T0).await.unwrap();
        algorithm.reset(&storage, "k").await.unwrap();

        let decision = algorithm.check_and_record(&storage, "k", &quota, T0).await.unwrap();
        assert!(decision.is_allowed());
    }
}
