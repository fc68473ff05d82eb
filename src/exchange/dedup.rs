//! Generic TTL-scoped key deduplication, shared by the funding-rate poller
//! (dedup by `exchangeTs`, §4.3) and WS clients that need a duplicate-trade
//! guard (§4.5) instead of re-implementing the same sliding-window cache
//! twice.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Thread-safe, TTL-scoped "have I seen this key" cache.
pub struct Deduplicator {
    cache: DashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl Deduplicator {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Returns `true` if `key` was already seen within `ttl`, and records it
    /// either way (a fresh key is stamped so later calls see it).
    pub fn is_duplicate(&self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(entry) = self.cache.get(key) {
            if now.duration_since(*entry) < self.ttl {
                return true;
            }
        }

        self.cache.insert(key.to_string(), now);
        if self.cache.len() > self.max_entries {
            self.gc();
        }
        false
    }

    pub fn gc(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.cache.retain(|_, inserted| now.duration_since(*inserted) < ttl);

        if self.cache.len() > self.max_entries {
            let mut entries: Vec<(String, Instant)> = self
                .cache
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect();
            entries.sort_by_key(|(_, ts)| *ts);
            let to_remove = entries.len().saturating_sub(self.max_entries);
            for (key, _) in entries.into_iter().take(to_remove) {
                self.cache.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
