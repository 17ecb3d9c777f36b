//! Bounded least-recently-used map
//!
//! Recency is a monotonically increasing tick per access; `order` maps ticks back
//! to keys so the oldest entry is always the first key of the B-tree.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (u64, V)>,
    order: BTreeMap<u64, K>,
    tick: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            tick: 0,
            evictions: 0,
        }
    }

    /// Look up and mark as most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (used, _) = self.entries.get_mut(key)?;
        self.order.remove(&*used);
        *used = tick;
        self.order.insert(tick, key.clone());
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Look up without touching recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Insert or replace; returns the evicted entry when the cache was full
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.next_tick();
        if let Some((used, old)) = self.entries.get_mut(&key) {
            self.order.remove(&*used);
            *used = tick;
            *old = value;
            self.order.insert(tick, key);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        self.order.insert(tick, key.clone());
        self.entries.insert(key, (tick, value));
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (used, value) = self.entries.remove(key)?;
        self.order.remove(&used);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped for capacity since creation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (_, value) = self.entries.remove(&key)?;
        self.evictions += 1;
        Some((key, value))
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
