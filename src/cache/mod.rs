//! In-process TTL caches backing the effective-group cache (§4.2.4) and
//! the per-object entity/link/type caches (§5).
//!
//! Grounded on the teacher's `security/rbac_cache.rs` (TTL-keyed
//! privilege cache, `Instant`-based expiry) and `cache/cache_invalidation.rs`
//! (explicit per-key invalidation on mutation). The spec's §6 `KV`
//! inward contract is a separate, swappable concern — this is the
//! default in-process implementation used when no external KV store is
//! wired in.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A TTL-expiring cache keyed by `K`. Entries are lazily evicted on
/// read; nothing runs a background sweep.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// A monotonically increasing generation counter. Bumped on any
/// `group_members` write (spec §4.2.4, §9: "prefer generation-counter
/// invalidation... because a membership change can affect many users
/// transitively").
#[derive(Default)]
pub struct Generation(AtomicU64);

impl Generation {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn expires_after_ttl() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(20));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn invalidate_removes_immediately() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn generation_bumps_monotonically() {
        let gen = Generation::new();
        assert_eq!(gen.current(), 0);
        assert_eq!(gen.bump(), 1);
        assert_eq!(gen.bump(), 2);
        assert_eq!(gen.current(), 2);
    }
}
