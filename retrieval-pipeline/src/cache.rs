//! Bounded LRU cache for first-turn answers, with a TTL checked on every read.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use lru::LruCache;
use tracing::debug;

/// Lowercases, drops punctuation and collapses whitespace.
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key for a question, scoped by the optional category filter.
pub fn cache_key(question: &str, category: Option<&str>) -> String {
    let normalized = normalize_question(question);
    match category {
        Some(category) => format!("{}|{normalized}", category.to_lowercase()),
        None => normalized,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<V> {
    entries: LruCache<String, Entry<V>>,
    hits: u64,
    misses: u64,
}

pub struct ResponseCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.lock();

        let lookup = inner.entries.get(key).map(|entry| {
            (
                now.saturating_duration_since(entry.inserted_at) < self.ttl,
                entry.value.clone(),
            )
        });
        let fresh = match lookup {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                inner.entries.pop(key);
                debug!(key, "Expired cache entry dropped");
                None
            }
            None => None,
        };

        if fresh.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        fresh
    }

    pub fn insert(&self, key: String, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&self, key: String, value: V, now: Instant) {
        let mut inner = self.lock();

        let at_capacity = inner.entries.len() >= inner.entries.cap().get();
        if at_capacity && !inner.entries.contains(&key) {
            let expired: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.inserted_at) >= self.ttl)
                .map(|(key, _)| key.clone())
                .collect();
            for stale in &expired {
                inner.entries.pop(stale);
            }
            if expired.is_empty() {
                if let Some((evicted, _)) = inner.entries.pop_lru() {
                    debug!(key = %evicted, "Evicted least recently used cache entry");
                }
            }
        }

        inner.entries.put(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }
}
