//! Redis implementation of the KvStore trait

use crate::{KvError, KvResult, KvStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Production KvStore backed by a Redis connection manager.
///
/// The connection manager reconnects transparently; callers treat every
/// error as a cache miss at their own layer.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url).map_err(|e| KvError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_seconds)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_seconds as i64)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a running Redis server:
    //   docker run -p 6379:6379 redis:7-alpine
    // CI covers the same contract through InMemoryKv.

    #[tokio::test]
    #[ignore = "requires Redis server on localhost:6379"]
    async fn test_redis_round_trip() {
        let kv = RedisKv::connect("redis://localhost:6379/0")
            .await
            .expect("Redis server must be running on localhost:6379");

        kv.set_ex("kv-store:test", "hello", 30).await.unwrap();
        assert_eq!(
            kv.get("kv-store:test").await.unwrap(),
            Some("hello".to_string())
        );

        let first = kv.incr("kv-store:test-counter").await.unwrap();
        let second = kv.incr("kv-store:test-counter").await.unwrap();
        assert_eq!(second, first + 1);
        assert!(kv.expire("kv-store:test-counter", 1).await.unwrap());
    }
}
