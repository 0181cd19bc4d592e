//! Generic TTL-bounded read-through cache.
//!
//! Backs the enabled-workflow-by-trigger-name cache (§4.3 of the design) and
//! the activity stats cache (§4.5). Entries expire after a fixed TTL and can
//! be invalidated individually or by key prefix. Built on `dashmap`, the same
//! concurrent-map primitive the rest of this workspace reaches for.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// A TTL cache keyed by `K`, storing cloneable values `V`.
///
/// Not a cache of record: a miss always falls through to the caller's
/// fallback (typically a store query), per spec.md §7's `CacheError`
/// handling -- this type has no fallible path, it only ever returns `None`
/// on miss or expiry.
pub struct TtlCache<K, V, C: Clock> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    clock: C,
}

impl<K: Eq + Hash + Clone, V: Clone, C: Clock> TtlCache<K, V, C> {
    pub fn new(ttl: Duration, clock: C) -> Self {
        Self { entries: DashMap::new(), ttl, clock }
    }

    /// Look up a live entry. Expired entries are removed lazily on access.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > self.clock.now() {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now()
            + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Invalidate a single key.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone, C: Clock> TtlCache<String, V, C> {
    /// Invalidate every key sharing the given prefix (§4.5: stats cache keys
    /// are invalidated by deleting everything under `activity:stats:{projectId}:`).
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }
}
