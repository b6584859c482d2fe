//! Per-instance account list cache with TTL.

use crate::clock::Clock;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

struct CacheEntry {
    bytes: Vec<u8>,
    expires_at: i64,
}

/// Byte-valued cache keyed by instance id. Entries expire lazily against the
/// injected clock; when full, the entry closest to expiry is evicted.
pub struct AccountCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl AccountCache {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now_unix();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.bytes.clone()));

        match hit {
            Some((true, bytes)) => Some(bytes),
            Some((false, _)) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    /// Stores `bytes` for `ttl_seconds`. A non-positive TTL stores nothing.
    pub fn set(&self, key: &str, bytes: Vec<u8>, ttl_seconds: i64) {
        if ttl_seconds <= 0 {
            self.entries.remove(key);
            return;
        }
        let now = self.clock.now_unix();

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.entries.retain(|_, entry| entry.expires_at > now);
            if self.entries.len() >= self.max_entries {
                let victim = self
                    .entries
                    .iter()
                    .min_by_key(|entry| entry.expires_at)
                    .map(|entry| entry.key().clone());
                if let Some(victim) = victim {
                    debug!(key = %victim, "Account cache full, evicting");
                    self.entries.remove(&victim);
                }
            }
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                bytes,
                expires_at: now + ttl_seconds,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClock;

    fn cache(max: usize) -> (AccountCache, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(1_000));
        (AccountCache::new(clock.clone(), max), clock)
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache(4);
        cache.set("a", b"accounts".to_vec(), 60);

        clock.set(1_059);
        assert_eq!(cache.get("a").as_deref(), Some(&b"accounts"[..]));

        clock.set(1_060);
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove() {
        let (cache, _clock) = cache(4);
        cache.set("a", vec![1], 60);
        cache.remove("a");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_non_positive_ttl_stores_nothing() {
        let (cache, _clock) = cache(4);
        cache.set("a", vec![1], 0);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_full_cache_evicts_soonest_expiry() {
        let (cache, _clock) = cache(2);
        cache.set("short", vec![1], 10);
        cache.set("long", vec![2], 100);
        cache.set("new", vec![3], 50);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
        assert!(cache.get("new").is_some());
    }
}
