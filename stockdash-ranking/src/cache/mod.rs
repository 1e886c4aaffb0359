//! TTL cache in front of the expensive ranking computations.
//!
//! [`CacheLayer`] stores JSON envelopes in a [`CacheBackend`] and never lets a
//! backend failure reach the caller: a failed read is a miss, a failed write
//! is logged and skipped. A circuit breaker stops a dead backend from adding
//! latency to every request.
//!
//! # Namespaces
//!
//! | key                  | content                  |
//! |----------------------|--------------------------|
//! | `rank:top{n}`        | ranked top-N list        |
//! | `universe:sorted`    | codes by market cap      |
//! | `detail:{code}`      | one scored security      |
//! | `page:{page}:{size}` | one universe page        |
//! | `search:{keyword}`   | keyword search result    |

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::RankingError;

mod backend;
mod memory;
#[cfg(feature = "redis-backend")]
mod redis_backend;

pub use backend::{CacheBackend, CacheError, InMemoryBackend};
pub use memory::MemoryTier;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisBackend;

/// Cache key builders.
pub mod keys {
    pub const RANK_PREFIX: &str = "rank:";
    pub const UNIVERSE_PREFIX: &str = "universe:";
    pub const DETAIL_PREFIX: &str = "detail:";
    pub const PAGE_PREFIX: &str = "page:";
    pub const SEARCH_PREFIX: &str = "search:";

    pub const UNIVERSE_SORTED: &str = "universe:sorted";

    /// Every namespace, for full invalidation.
    pub const ALL_PREFIXES: [&str; 5] =
        [RANK_PREFIX, UNIVERSE_PREFIX, DETAIL_PREFIX, PAGE_PREFIX, SEARCH_PREFIX];

    pub fn rank_top(n: usize) -> String {
        format!("{RANK_PREFIX}top{n}")
    }

    pub fn detail(code: &str) -> String {
        format!("{DETAIL_PREFIX}{code}")
    }

    pub fn page(page: usize, size: usize) -> String {
        format!("{PAGE_PREFIX}{page}:{size}")
    }

    /// Keywords are trimmed and lowercased so equivalent searches share a key.
    pub fn search(keyword: &str) -> String {
        format!("{SEARCH_PREFIX}{}", normalize_keyword(keyword))
    }

    pub fn normalize_keyword(keyword: &str) -> String {
        keyword.trim().to_lowercase()
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Stored form of every cached value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    payload: T,
    written_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl<T> Envelope<T> {
    /// Lifetime left at `now`; `None` once expired. A `written_at` in the
    /// future (clock skew between writers) counts as age zero.
    fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let age_ms = (now - self.written_at).num_milliseconds().max(0) as u64;
        self.ttl_ms
            .checked_sub(age_ms)
            .filter(|&left| left > 0)
            .map(Duration::from_millis)
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    memory_hits: AtomicU64,
    misses: AtomicU64,
    backend_errors: AtomicU64,
    decode_errors: AtomicU64,
    write_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Cache counters since start-up.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub backend: &'static str,
    pub hits: u64,
    pub memory_hits: u64,
    pub misses: u64,
    pub backend_errors: u64,
    pub decode_errors: u64,
    pub write_failures: u64,
    #[serde(skip)]
    pub circuit: CircuitState,
}

impl CacheStats {
    /// Share of lookups served from cache (either tier).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.memory_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

// ============================================================================
// Cache Layer
// ============================================================================

/// Failure-absorbing cache over a [`CacheBackend`].
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    breaker: CircuitBreaker,
    counters: Counters,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::with_name(format!("cache-{}", backend.name()))
                .failure_threshold(3)
                .reset_timeout(Duration::from_secs(15)),
        );
        Self::with_breaker(backend, breaker)
    }

    pub fn with_breaker(backend: Arc<dyn CacheBackend>, breaker: CircuitBreaker) -> Self {
        Self {
            backend,
            breaker,
            counters: Counters::default(),
        }
    }

    /// Process-local layer on an [`InMemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Read and decode a value, surfacing backend and decode errors.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RankingError> {
        Ok(self.try_get_with_remaining(key).await?.map(|(value, _)| value))
    }

    /// [`Self::try_get`] plus the entry's remaining lifetime: the shorter of
    /// the envelope's own and the backend's.
    pub async fn try_get_with_remaining<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(T, Duration)>, RankingError> {
        let (raw, backend_remaining) = match self.guarded(self.backend.get_with_ttl(key)).await? {
            Some(found) => found,
            None => return Ok(None),
        };

        let envelope: Envelope<T> =
            serde_json::from_str(&raw).map_err(|e| RankingError::serialization(key, e))?;

        let Some(remaining) = envelope.remaining(Utc::now()) else {
            return Ok(None);
        };
        let remaining = backend_remaining.map_or(remaining, |b| b.min(remaining));
        Ok(Some((envelope.payload, remaining)))
    }

    /// Read a value; any failure is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_remaining(key).await.map(|(value, _)| value)
    }

    /// Read a value with its remaining lifetime; any failure is a miss.
    pub async fn get_with_remaining<T: DeserializeOwned>(&self, key: &str) -> Option<(T, Duration)> {
        match self.try_get_with_remaining(key).await {
            Ok(Some(found)) => {
                bump(&self.counters.hits);
                debug!(key, "Cache hit");
                Some(found)
            }
            Ok(None) => {
                bump(&self.counters.misses);
                None
            }
            Err(RankingError::Serialization { key, reason }) => {
                bump(&self.counters.decode_errors);
                bump(&self.counters.misses);
                warn!(key = %key, reason = %reason, "Undecodable cache entry, dropping it");
                if let Err(e) = self.guarded(self.backend.delete(&key)).await {
                    debug!(key = %key, error = %e, "Failed to delete undecodable entry");
                }
                None
            }
            Err(e) => {
                bump(&self.counters.backend_errors);
                bump(&self.counters.misses);
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a value. Returns whether the write reached the backend.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let envelope = Envelope {
            payload: value,
            written_at: Utc::now(),
            ttl_ms: ttl.as_millis() as u64,
        };

        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                bump(&self.counters.write_failures);
                warn!(key, error = %e, "Failed to encode cache value");
                return false;
            }
        };

        match self.guarded(self.backend.set(key, raw, ttl)).await {
            Ok(()) => true,
            Err(e) => {
                bump(&self.counters.write_failures);
                warn!(key, error = %e, "Cache write failed, value not cached");
                false
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.guarded(self.backend.delete(key)).await {
            warn!(key, error = %e, "Cache invalidation failed");
        }
    }

    /// Delete a whole namespace. Not atomic: concurrent readers may see a mix
    /// of old and new entries until it completes.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        match self.guarded(self.backend.delete_prefix(prefix)).await {
            Ok(count) => {
                debug!(prefix, count, "Invalidated namespace");
                count
            }
            Err(e) => {
                warn!(prefix, error = %e, "Namespace invalidation failed");
                0
            }
        }
    }

    /// Cache-aside: return the cached value or compute, store and return it.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_or_compute_if(key, ttl, compute, |_| true).await
    }

    /// Like [`Self::get_or_compute`], storing the result only when `cacheable` holds.
    pub async fn get_or_compute_if<T, F, Fut, P>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        cacheable: P,
    ) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        P: FnOnce(&T) -> bool,
    {
        if let Some(value) = self.get(key).await {
            return value;
        }

        let value = compute().await;
        if cacheable(&value) {
            self.set(key, &value, ttl).await;
        } else {
            debug!(key, "Computed value not cacheable, skipping write");
        }
        value
    }

    /// Read through a memory tier: memory, then backend (refreshing memory).
    ///
    /// A backend hit enters the memory tier with the entry's remaining
    /// lifetime, capped at `ttl`, so it never outlives the backend copy.
    pub async fn get_tiered<T>(&self, tier: &MemoryTier<T>, key: &str, ttl: Duration) -> Option<T>
    where
        T: Clone + DeserializeOwned,
    {
        if let Some(value) = tier.get(key) {
            bump(&self.counters.memory_hits);
            return Some(value);
        }

        let (value, remaining): (T, Duration) = self.get_with_remaining(key).await?;
        tier.insert(key, value.clone(), remaining.min(ttl));
        Some(value)
    }

    /// Write both tiers.
    pub async fn set_tiered<T>(&self, tier: &MemoryTier<T>, key: &str, value: &T, ttl: Duration) -> bool
    where
        T: Clone + Serialize,
    {
        tier.insert(key, value.clone(), ttl);
        self.set(key, value, ttl).await
    }

    pub fn stats(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            backend: self.backend.name(),
            hits: load(&self.counters.hits),
            memory_hits: load(&self.counters.memory_hits),
            misses: load(&self.counters.misses),
            backend_errors: load(&self.counters.backend_errors),
            decode_errors: load(&self.counters.decode_errors),
            write_failures: load(&self.counters.write_failures),
            circuit: self.breaker.state(),
        }
    }

    /// Run a backend call through the circuit breaker.
    async fn guarded<R>(
        &self,
        call: impl Future<Output = Result<R, CacheError>>,
    ) -> Result<R, CacheError> {
        if !self.breaker.can_execute() {
            return Err(CacheError::Unavailable("circuit open".into()));
        }

        match call.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                if matches!(e, CacheError::Unavailable(_)) {
                    self.breaker.record_failure();
                }
                Err(e)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
