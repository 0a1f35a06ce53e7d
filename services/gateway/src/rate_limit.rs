//! Per-customer token-bucket rate limiting over the shared KV store.
//!
//! Bucket state lives in the KV store so every gateway instance draws from
//! the same budget. Capacity equals the per-minute limit; refill is
//! `capacity / 60` tokens per second. The KV store is best-effort: if it is
//! unavailable the gateway fails open rather than blocking payments.

use chrono::Utc;
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BUCKET_TTL_SECONDS: u64 = 120;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BucketState {
    tokens: f64,
    updated_at: f64,
}

/// Refill the bucket for elapsed time, capped at capacity.
fn refill(state: BucketState, now: f64, capacity: f64, refill_per_sec: f64) -> BucketState {
    let elapsed = (now - state.updated_at).max(0.0);
    BucketState {
        tokens: (state.tokens + elapsed * refill_per_sec).min(capacity),
        updated_at: now,
    }
}

#[derive(Clone)]
pub struct TokenBucket {
    kv: Arc<dyn KvStore>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    /// Bucket sized from the per-minute rate limit.
    pub fn new(kv: Arc<dyn KvStore>, rate_limit_per_minute: u32) -> Self {
        let capacity = f64::from(rate_limit_per_minute.max(1));
        Self {
            kv,
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    /// Take one token for the customer. Returns false when the bucket is
    /// empty (the caller responds 429).
    pub async fn try_acquire(&self, customer_id: &str) -> bool {
        let key = format!("tokenbucket:{customer_id}");
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;

        let state = match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str::<BucketState>(&raw).unwrap_or(BucketState {
                tokens: self.capacity,
                updated_at: now,
            }),
            Ok(None) => BucketState {
                tokens: self.capacity,
                updated_at: now,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Rate-limit state unavailable, failing open");
                return true;
            }
        };

        let mut state = refill(state, now, self.capacity, self.refill_per_sec);
        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }

        if let Ok(raw) = serde_json::to_string(&state) {
            if let Err(e) = self.kv.set_ex(&key, &raw, BUCKET_TTL_SECONDS).await {
                tracing::warn!(error = %e, "Rate-limit state write failed");
            }
        }

        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::InMemoryKv;

    #[test]
    fn test_refill_caps_at_capacity() {
        let state = BucketState {
            tokens: 1.0,
            updated_at: 0.0,
        };
        let refilled = refill(state, 3600.0, 30.0, 0.5);
        assert_eq!(refilled.tokens, 30.0);
    }

    #[test]
    fn test_refill_is_proportional_to_elapsed() {
        let state = BucketState {
            tokens: 0.0,
            updated_at: 100.0,
        };
        let refilled = refill(state, 104.0, 30.0, 0.5);
        assert!((refilled.tokens - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_refill_ignores_clock_skew() {
        let state = BucketState {
            tokens: 5.0,
            updated_at: 200.0,
        };
        let refilled = refill(state, 150.0, 30.0, 0.5);
        assert_eq!(refilled.tokens, 5.0);
    }

    #[tokio::test]
    async fn test_bucket_exhausts_at_capacity() {
        let bucket = TokenBucket::new(Arc::new(InMemoryKv::new()), 2);

        assert!(bucket.try_acquire("cust-1").await);
        assert!(bucket.try_acquire("cust-1").await);
        assert!(
            !bucket.try_acquire("cust-1").await,
            "third draw within the same instant must be limited"
        );
    }

    #[tokio::test]
    async fn test_buckets_are_per_customer() {
        let bucket = TokenBucket::new(Arc::new(InMemoryKv::new()), 1);

        assert!(bucket.try_acquire("cust-a").await);
        assert!(!bucket.try_acquire("cust-a").await);
        assert!(bucket.try_acquire("cust-b").await, "separate budget");
    }
}
