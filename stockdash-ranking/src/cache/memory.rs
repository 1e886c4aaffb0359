//! Process-local tier in front of the shared backend.
//!
//! Holds decoded values, so a hit costs a clone instead of a round trip and a
//! JSON parse. Bounded: when full, expired entries go first, then the entry
//! closest to expiry.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

/// Bounded in-process cache of `(value, expiry)` pairs.
#[derive(Debug)]
pub struct MemoryTier<T> {
    entries: RwLock<HashMap<String, (T, Instant)>>,
    capacity: usize,
}

impl<T: Clone> MemoryTier<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let now = Instant::now();
            entries.retain(|_, (_, expires_at)| now < *expires_at);

            if entries.len() >= self.capacity {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, (_, expires_at))| *expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    entries.remove(&k);
                }
            }
        }

        entries.insert(key, (value, Instant::now() + ttl));
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|k, _| !k.starts_with(prefix));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
