use core::{hash::Hash, time::Duration};
use std::time::Instant;

use dashmap::DashMap;

/// Keyed cache whose entries go stale `ttl` after insertion.
pub struct TtlCache<K, V> {
    ttl: Duration,
    map: DashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.map.get(key) {
            let (at, value) = &*entry;
            if at.elapsed() < self.ttl {
                return Some(value.clone());
            }
        }
        // re-checked under the shard lock: a concurrent insert must survive
        self.map.remove_if(key, |_, (at, _)| at.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.map.insert(key, (Instant::now(), value));
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, (at, _)| at.elapsed() < self.ttl);
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_are_returned() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_entries_are_evicted() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinserted_entry_outlives_the_stale_one() {
        let cache = TtlCache::new(Duration::from_millis(30));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());

        cache.insert("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }
}
