//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `fetch` calls served from a fresh entry.
    pub hits: u64,
    /// `fetch` calls that launched a new fetch.
    pub misses: u64,
    /// `fetch` calls that joined an in-flight fetch for the same key.
    pub dedup_joins: u64,
    /// Fetches that settled with an error.
    pub fetch_failures: u64,
    /// Number of entries currently in memory.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Joins count as neither.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub dedup_joins: AtomicU64,
    pub fetch_failures: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            entry_count,
        }
    }
}
