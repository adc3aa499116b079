use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Bounded map evicting the least recently used entry
///
/// Recency is tracked with a monotonically increasing stamp per access; the
/// stamp index orders entries from least to most recently used.
#[derive(Debug)]
pub struct LruMap<K, V> {
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    capacity: usize,
    clock: u64,
}

impl<K: Clone + Eq + Hash, V: Clone> LruMap<K, V> {
    /// Creates an empty map holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns the value for `key` and marks it most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        let stamp = self.tick();
        let (value, old_stamp) = self.entries.get_mut(key)?;
        let previous = std::mem::replace(old_stamp, stamp);
        let value = value.clone();

        self.recency.remove(&previous);
        self.recency.insert(stamp, key.clone());
        Some(value)
    }

    /// Inserts `value` unless `key` is already present
    ///
    /// Returns the value stored for `key` afterwards, which is the existing
    /// one if there was any. Either way the key becomes most recently used.
    pub fn insert_if_absent(&mut self, key: K, value: V) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let stamp = self.tick();
        self.recency.insert(stamp, key.clone());
        self.entries.insert(key, (value.clone(), stamp));
        value
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
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
}
