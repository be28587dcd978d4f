//! Bounded map with least-recently-used eviction.
//!
//! Recency is a monotonically increasing tick stamped on every `put`,
//! `get` and `touch`. The entry with the smallest tick is the one evicted.
//! `peek` and `contains` read without changing recency.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

pub struct LruMap<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    /// Create an empty map. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Mark `key` as most recently used. Returns false if absent.
    pub fn touch<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some((_, stamp)) = self.entries.get_mut(key) else {
            return false;
        };
        self.tick += 1;
        let tick = self.tick;
        if let Some(k) = self.recency.remove(stamp) {
            self.recency.insert(tick, k);
        }
        *stamp = tick;
        true
    }

    /// Look up `key` and mark it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.touch(key) {
            return None;
        }
        self.entries.get(key).map(|(v, _)| v)
    }

    /// Look up `key` without affecting recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|(v, _)| v)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Insert or replace `key` as the most recently used entry.
    ///
    /// When the insert pushes the map past capacity, the least recently
    /// used entry is removed and returned.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.next_tick();
        if let Some((_, old_tick)) = self.entries.insert(key.clone(), (value, tick)) {
            self.recency.remove(&old_tick);
        }
        self.recency.insert(tick, key);

        if self.entries.len() > self.capacity {
            self.evict_lru()
        } else {
            None
        }
    }

    /// Remove and return the least recently used entry.
    pub fn evict_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.recency.pop_first()?;
        let (value, _) = self.entries.remove(&key)?;
        Some((key, value))
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (value, tick) = self.entries.remove(key)?;
        self.recency.remove(&tick);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let mut lru = LruMap::new(2);
        assert!(lru.put("a".to_string(), 1).is_none());
        assert_eq!(lru.get("a"), Some(&1));
        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_on_overflow() {
        let mut lru = LruMap::new(3);
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            lru.put(k.to_string(), i);
        }
        let evicted = lru.put("d".to_string(), 3);
        assert_eq!(evicted, Some(("a".to_string(), 0)));
        assert!(!lru.contains("a"));
        assert!(lru.contains("b") && lru.contains("c") && lru.contains("d"));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut lru = LruMap::new(2);
        lru.put("a".to_string(), 1);
        lru.put("b".to_string(), 2);
        lru.get("a");
        let evicted = lru.put("c".to_string(), 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("b".to_string()));
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let mut lru = LruMap::new(2);
        lru.put("a".to_string(), 1);
        lru.put("b".to_string(), 2);
        assert_eq!(lru.peek("a"), Some(&1));
        let evicted = lru.put("c".to_string(), 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("a".to_string()));
    }

    #[test]
    fn test_touch_missing_key() {
        let mut lru: LruMap<String, u8> = LruMap::new(1);
        assert!(!lru.touch("nope"));
        assert_eq!(lru.tick, 0);

        lru.put("a".to_string(), 1);
        assert!(!lru.touch("nope"));
        assert_eq!(lru.tick, 1);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut lru = LruMap::new(2);
        lru.put("a".to_string(), 1);
        lru.put("b".to_string(), 2);
        assert!(lru.put("a".to_string(), 10).is_none());
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.peek("a"), Some(&10));
        // "b" is now the oldest
        assert_eq!(lru.evict_lru().map(|(k, _)| k), Some("b".to_string()));
    }

    #[test]
    fn test_remove() {
        let mut lru = LruMap::new(2);
        lru.put("a".to_string(), 1);
        assert_eq!(lru.remove("a"), Some(1));
        assert_eq!(lru.remove("a"), None);
        assert!(lru.evict_lru().is_none());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut lru = LruMap::new(0);
        assert_eq!(lru.capacity(), 1);
        lru.put(1u32, "x");
        assert_eq!(lru.put(2u32, "y"), Some((1, "x")));
    }
}
