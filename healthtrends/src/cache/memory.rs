use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters for a [`CacheManager`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Entries currently held, expired or not
    pub size: usize,
}

impl CacheStats {
    /// Fraction of reads that were hits
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe key/value cache with per-entry expiry.
///
/// There is no size bound; entries leave only by expiry, `delete` or `clear`.
#[derive(Debug)]
pub struct CacheManager<V> {
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> CacheManager<V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value for `key`. Expired entries are dropped and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                inner.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {
                inner.entries.remove(key);
            }
            None => {}
        }

        inner.misses += 1;
        None
    }

    /// Store `value` until `now + ttl`, replacing any existing entry
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.lock()
            .entries
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Remove one entry; returns whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Whether `key` holds a live entry. Does not touch counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Keys of live entries, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
        }
    }
}
