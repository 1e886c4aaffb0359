//! Key/value backends behind the cache layer.
//!
//! Backends store opaque strings with a TTL. Serialization, envelopes and
//! failure absorption live one level up in [`super::CacheLayer`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised by cache backends.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Backend could not be reached (connection refused, timeout, circuit open)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered with an error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Async key/value store with per-key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name used in logs (e.g., "memory", "redis")
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Like [`Self::get`], also returning the key's remaining lifetime when
    /// the backend tracks one.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>, CacheError> {
        Ok(self.get(key).await?.map(|value| (value, None)))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Map size at which a write first sweeps out expired entries.
const PURGE_THRESHOLD: usize = 1024;

/// Process-local backend; the default when no Redis is configured.
///
/// Expired entries are invisible to reads and swept on writes once the map
/// reaches [`PURGE_THRESHOLD`] entries.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| !e.is_expired()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> CacheError {
        CacheError::Backend("in-memory cache lock poisoned".into())
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>, CacheError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| {
                let remaining = entry.expires_at.saturating_duration_since(now);
                (entry.value.clone(), Some(remaining))
            }))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if entries.len() >= PURGE_THRESHOLD {
            entries.retain(|_, entry| !entry.is_expired());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}
