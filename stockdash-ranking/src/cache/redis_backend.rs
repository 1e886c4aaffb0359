//! Shared Redis backend (feature `redis-backend`).
//!
//! Keys carry a global prefix (default `stockdash:`) so several deployments
//! can share one Redis. Expiry is delegated to Redis with `SET .. PX`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::backend::{CacheBackend, CacheError};

const SCAN_BATCH: usize = 200;

/// Redis-backed cache; cloning the connection manager is cheap and
/// reconnects transparently.
pub struct RedisBackend {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisBackend {
    /// Connect to `url` and verify the connection with a `PING`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(map_redis_error)?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(map_redis_error)?;

        tracing::info!(url = %url, "Connected to Redis cache backend");

        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn map_redis_error(e: redis::RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped() {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::Backend(e.to_string())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.prefixed(key))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>, CacheError> {
        let mut conn = self.conn.clone();
        let key = self.prefixed(key);
        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        // PTTL is -1 without expiry and -2 once the key is gone
        Ok(value.map(|v| {
            let remaining = (pttl > 0).then(|| Duration::from_millis(pttl as u64));
            (v, remaining)
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        redis::cmd("SET")
            .arg(self.prefixed(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.prefixed(key))
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_redis_error)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.prefixed(prefix));
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            if !keys.is_empty() {
                let removed: i64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_redis_error)?;
                deleted += removed.max(0) as usize;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(pattern = %pattern, deleted, "Deleted keys by prefix");
        Ok(deleted)
    }
}
