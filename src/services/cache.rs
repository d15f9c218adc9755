//! Bounded LRU cache with per-entry TTL.
//!
//! Entries live in a slab of nodes linked into a recency list; the hash map
//! indexes the slab, so touch, insert and evict are all O(1).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Least-recently-used map with a fixed capacity. Not synchronized.
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn node(&self, idx: usize) -> Option<&Node<K, V>> {
        self.nodes.get(idx)?.as_ref()
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<K, V>> {
        self.nodes.get_mut(idx)?.as_mut()
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };
        if prev == NIL {
            self.head = next;
        } else if let Some(n) = self.node_mut(prev) {
            n.next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else if let Some(n) = self.node_mut(next) {
            n.prev = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        let Some(n) = self.node_mut(idx) else {
            return;
        };
        n.prev = NIL;
        n.next = old_head;
        if old_head != NIL {
            if let Some(h) = self.node_mut(old_head) {
                h.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn remove_index(&mut self, idx: usize) -> Option<(K, V)> {
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.free.push(idx);
        self.map.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Look up a key and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        self.node(idx).map(|n| &n.value)
    }

    /// Look up a key without changing recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.node(idx).map(|n| &n.value)
    }

    /// Insert or replace. When a new key arrives at capacity the least recently
    /// used entry is evicted first and returned.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(n) = self.node_mut(idx) {
                n.value = value;
            }
            self.unlink(idx);
            self.push_front(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.remove_index(idx).map(|(_, v)| v)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        self.remove_index(self.tail)
    }

    /// Change capacity, evicting from the cold end if shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.map.len() > self.capacity {
            self.pop_lru();
        }
    }

    /// Keys ordered from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.head;
        while let Some(n) = self.node(cur) {
            out.push(n.key.clone());
            cur = n.next;
        }
        out
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

/// A cached value with the time it was stored and how long it stays fresh.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// A thread-safe LRU cache with TTL support.
///
/// Every check-evict-insert sequence runs under one mutex, so capacity and
/// freshness hold under any interleaving of callers.
pub struct TtlCache<K, V> {
    inner: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get a fresh value. Expired entries are dropped on access.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_entry(key).map(|e| e.value)
    }

    /// Get a fresh entry including its metadata.
    pub fn get_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let mut cache = self.lock();
        let now = Instant::now();
        match cache.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// Most recent entry for a key regardless of freshness.
    #[cfg(test)]
    pub fn peek_stale(&self, key: &K) -> Option<CacheEntry<V>> {
        self.lock().peek(key).cloned()
    }

    /// Store a value, evicting the least recently used entry if full.
    /// Returns the evicted key, if any.
    pub fn insert(&self, key: K, value: V, ttl: Duration) -> Option<K> {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        self.lock().insert(key, entry).map(|(k, _)| k)
    }

    #[cfg(test)]
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|e| e.value)
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.lock().set_capacity(capacity);
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let mut cache = self.lock();
        let now = Instant::now();
        let stale: Vec<K> = cache
            .keys()
            .into_iter()
            .filter(|k| cache.peek(k).map(|e| !e.is_fresh(now)).unwrap_or(false))
            .collect();
        for k in &stale {
            cache.remove(k);
        }
        stale.len()
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[cfg(test)]
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // LruCache
    // =========================================================================

    #[test]
    fn test_lru_basic() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get(&"a");
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("b", 2)));
        assert_eq!(cache.keys(), vec!["c", "a"]);
    }

    #[test]
    fn test_lru_replace_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 10), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&"a"), Some(&10));
        assert_eq!(cache.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_lru_never_exceeds_capacity() {
        let mut cache = LruCache::new(3);
        for i in 0..100 {
            cache.insert(i, i * 2);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.keys(), vec![99, 98, 97]);
    }

    #[test]
    fn test_lru_reuses_slots() {
        let mut cache = LruCache::new(2);
        for i in 0..50 {
            cache.insert(i, ());
        }
        assert!(cache.nodes.len() <= 3);
    }

    #[test]
    fn test_lru_survives_dangling_index() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.unlink(99);
        cache.push_front(99);
        assert_eq!(cache.keys(), vec!["b", "a"]);
        assert_eq!(cache.get(&"a"), Some(&1));
    }

    #[test]
    fn test_lru_remove_and_shrink() {
        let mut cache = LruCache::new(4);
        for i in 0..4 {
            cache.insert(i, i);
        }
        assert_eq!(cache.remove(&2), Some(2));
        assert_eq!(cache.remove(&2), None);
        cache.set_capacity(1);
        assert_eq!(cache.keys(), vec![3]);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.pop_lru(), None);
    }

    // =========================================================================
    // TtlCache
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = TtlCache::new(4);
        cache.insert("key1".to_string(), "value1".to_string(), Duration::from_secs(30));
        assert_eq!(cache.get(&"key1".to_string()), Some("value1".to_string()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&"key1".to_string()), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_custom_per_entry() {
        let cache = TtlCache::new(4);
        cache.insert("short", 1, Duration::from_secs(30));
        cache.insert("long", 2, Duration::from_secs(180));

        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(cache.get(&"short"), None);
        assert_eq!(cache.get(&"long"), Some(2));
        // Stale entries are still visible to peek until purged.
        cache.insert("short", 1, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.peek_stale(&"short").is_some());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.peek_stale(&"short").is_none());
    }

    #[tokio::test]
    async fn test_ttl_cache_evicts_at_capacity() {
        let cache = TtlCache::new(2);
        assert_eq!(cache.insert("a", 1, Duration::from_secs(60)), None);
        assert_eq!(cache.insert("b", 2, Duration::from_secs(60)), None);
        assert_eq!(cache.insert("c", 3, Duration::from_secs(60)), Some("a"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.remove(&"b"), Some(2));
        cache.clear();
        assert!(cache.is_empty());
    }
}
