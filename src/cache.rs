//! Bounded Cache
//!
//! Small read-mostly cache shared between concurrently running queries.
//! Lookups take a shared lock; inserts take the exclusive lock and evict the
//! oldest entry once capacity is reached. Instances are created by whoever
//! builds the pipeline and handed to the components that need them.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

struct CacheInner<K, V> {
    data: HashMap<K, V>,
    /// Insertion order: oldest at front
    order: VecDeque<K>,
}

pub struct BoundedCache<K, V> {
    inner: RwLock<CacheInner<K, V>>,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                data: HashMap::new(),
                order: VecDeque::with_capacity(capacity.min(1024)),
            }),
            capacity,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.read().data.get(key).cloned()
    }

    /// Insert a value, evicting the oldest entry when full.
    /// A zero-capacity cache stores nothing.
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.write();
        if inner.data.contains_key(&key) {
            inner.data.insert(key, value);
            return;
        }
        while inner.data.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.data.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.data.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.data.clear();
        inner.order.clear();
    }

    // A panic while holding the lock leaves the map consistent (every
    // mutation is a single insert/remove), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, CacheInner<K, V>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner<K, V>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_evicts_oldest_when_full() {
        let cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_update_existing_does_not_evict() {
        let cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_zero_capacity() {
        let cache: BoundedCache<String, u32> = BoundedCache::new(0);
        cache.insert("x".to_string(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shared_across_threads() {
        let cache = Arc::new(BoundedCache::new(100));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.insert(format!("{}-{}", t, i), i);
                        let _ = cache.get(&format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 100);
    }
}
