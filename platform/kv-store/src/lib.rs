//! # Key/Value Store Abstraction
//!
//! The saga treats its fast KV store as best-effort shared state: velocity
//! counters for risk decisions, token buckets for gateway rate limiting, and
//! the idempotency response cache. Nothing here is authoritative; a KV
//! outage degrades to cache misses, and payment correctness falls back to
//! the orchestrator's unique `idempotency_key` constraint.
//!
//! Two implementations, swapped by configuration like the event bus:
//!
//! - **RedisKv**: production implementation over a Redis connection manager
//! - **InMemoryKv**: test/dev implementation with lazy key expiry

mod inmemory_kv;
mod redis_kv;

pub use inmemory_kv::InMemoryKv;
pub use redis_kv::RedisKv;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// Minimal KV operations the saga services depend on.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Store a value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> KvResult<()>;

    /// Atomically increment an integer key, creating it at 1.
    async fn incr(&self, key: &str) -> KvResult<i64>;

    /// Set or refresh a key's TTL. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> KvResult<bool>;
}
