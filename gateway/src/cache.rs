//! Short-TTL cache for idempotent GETs.
//!
//! A sharded concurrent map (`dashmap::DashMap`) is the idiom this codebase reaches for whenever
//! many tasks read/write small keyed entries without a single global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct CacheEntry<V> {
    value: V,
    expiry: Instant,
}

/// Keyed cache with a fixed per-entry TTL. `get` transparently treats an expired entry as a miss
/// without removing it eagerly — the next `insert` for that key overwrites it, the way the
/// teacher's `DashMap`-based caches are read-then-replaced rather than actively swept.
pub struct RequestCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> RequestCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if Instant::now() < entry.expiry {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expiry: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }
}
