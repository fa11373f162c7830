//! In-memory memoization service.
//!
//! Unbounded and TTL-free by default, so an entry lives as long as the cache
//! does. A cache can be given a maximum size (oldest insertion evicted first)
//! and/or a time-to-live.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Eviction settings shared by every cache built from one [`CachePolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePolicy {
  pub max_entries: Option<usize>,
  pub ttl: Option<Duration>,
}

struct Slot<V> {
  value: V,
  inserted: Instant,
}

struct Inner<K, V> {
  entries: HashMap<K, Slot<V>>,
  order: VecDeque<K>,
}

pub struct MemoCache<K, V> {
  policy: CachePolicy,
  inner: Mutex<Inner<K, V>>,
}

impl<K, V> MemoCache<K, V>
where
  K: Eq + Hash + Clone,
  V: Clone,
{
  pub fn new(policy: CachePolicy) -> Self {
    Self { policy, inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new() }) }
  }

  pub fn get(&self, key: &K) -> Option<V> {
    let mut inner = self.inner.lock();
    let expired = match inner.entries.get(key) {
      None => return None,
      Some(slot) => self.policy.ttl.is_some_and(|ttl| slot.inserted.elapsed() >= ttl),
    };
    if expired {
      inner.entries.remove(key);
      inner.order.retain(|k| k != key);
      return None;
    }
    inner.entries.get(key).map(|slot| slot.value.clone())
  }

  pub fn insert(&self, key: K, value: V) {
    let mut inner = self.inner.lock();
    if inner.entries.insert(key.clone(), Slot { value, inserted: Instant::now() }).is_some() {
      inner.order.retain(|k| k != &key);
    }
    inner.order.push_back(key);
    if let Some(max) = self.policy.max_entries {
      while inner.entries.len() > max.max(1) {
        let Some(oldest) = inner.order.pop_front() else { break };
        inner.entries.remove(&oldest);
      }
    }
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unbounded_keeps_everything() {
    let cache = MemoCache::new(CachePolicy::default());
    for i in 0..100 {
      cache.insert(i, i * 2);
    }
    assert_eq!(cache.len(), 100);
    assert_eq!(cache.get(&7), Some(14));
    assert_eq!(cache.get(&1000), None);
  }

  #[test]
  fn bounded_evicts_oldest() {
    let cache = MemoCache::new(CachePolicy { max_entries: Some(2), ttl: None });
    cache.insert("a", 1);
    cache.insert("b", 2);
    cache.insert("c", 3);
    assert_eq!(cache.get(&"a"), None);
    assert_eq!(cache.get(&"b"), Some(2));
    assert_eq!(cache.get(&"c"), Some(3));
  }

  #[test]
  fn reinsert_refreshes_order() {
    let cache = MemoCache::new(CachePolicy { max_entries: Some(2), ttl: None });
    cache.insert("a", 1);
    cache.insert("b", 2);
    cache.insert("a", 10);
    cache.insert("c", 3);
    assert_eq!(cache.get(&"a"), Some(10));
    assert_eq!(cache.get(&"b"), None);
  }

  #[test]
  fn zero_ttl_expires_immediately() {
    let cache = MemoCache::new(CachePolicy { max_entries: None, ttl: Some(Duration::ZERO) });
    cache.insert("k", 1);
    assert_eq!(cache.get(&"k"), None);
    assert_eq!(cache.len(), 0);
  }
}
