//! Least-recently-used ordering.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Records access order per key and yields the least recently used first.
///
/// Accesses are stamped with a monotonically increasing counter rather than
/// a clock, so two accesses in the same instant still have a strict order.
#[derive(Debug, Clone)]
pub struct LruTracker<K> {
    stamps: HashMap<K, u64>,
    order: BTreeMap<u64, K>,
    next: u64,
}

impl<K> Default for LruTracker<K> {
    fn default() -> Self {
        Self {
            stamps: HashMap::new(),
            order: BTreeMap::new(),
            next: 0,
        }
    }
}

impl<K: Clone + Eq + Hash> LruTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as most recently used.
    pub fn touch(&mut self, key: &K) {
        let stamp = self.next;
        self.next += 1;
        if let Some(old) = self.stamps.insert(key.clone(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.clone());
    }

    /// Stop tracking `key`.
    pub fn remove(&mut self, key: &K) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    /// Up to `n` keys, least recently used first.
    pub fn oldest(&self, n: usize) -> Vec<K> {
        self.order.values().take(n).cloned().collect()
    }

    /// Remove and return the least recently used key.
    pub fn pop_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.stamps.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}
