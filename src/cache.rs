//! Bounded TTL cache.
//!
//! One implementation backs both logical caches: the response/dedup cache
//! keyed by content fingerprint, and the optional bundle cache keyed by
//! composed-call fingerprint. Expired entries are invisible to readers and
//! removed on access; inserting above the bound evicts the oldest entry
//! by creation time.

use crate::logging::log_debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Bounded TTL map serialized by one mutex.
///
/// The mutex is `std::sync::Mutex`, never held across an await point, so
/// blocking acquisition is safe from async contexts. Lock poisoning is
/// recovered via `into_inner` since entries are plain values.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    /// Cache bounded at `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// Look up a live entry, removing it first if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                log_debug!(key = %key, "Cache entry expired on read");
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Insert a value with the given TTL, evicting the oldest entry when
    /// the bound is reached.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            // Prefer evicting something already dead before the oldest
            // live entry.
            let victim = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k.clone())
                .next()
                .or_else(|| {
                    entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.created_at)
                        .map(|(k, _)| k.clone())
                });
            if let Some(victim) = victim {
                entries.remove(&victim);
                log_debug!(key = %victim, "Cache evicted entry at capacity");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl,
            },
        );
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired stragglers included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
