use std::collections::HashMap;
use std::hash::Hash;

// ---------------------------------------------------------------------------
// LruMap — bounded map that evicts the least recently used entry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct LruEntry<V> {
    value: V,
    last_used: u64,
}

pub struct LruMap<K, V> {
    entries: HashMap<K, LruEntry<V>>,
    max_entries: usize,
    counter: u64,
}

impl<K, V> LruMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A zero capacity is treated as one.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            counter: 0,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.counter += 1;
        let counter = self.counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = counter;
            &entry.value
        })
    }

    /// Inserts or replaces `key`. Returns the entry evicted to stay within
    /// capacity, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.counter += 1;
        self.entries.insert(
            key,
            LruEntry {
                value,
                last_used: self.counter,
            },
        );

        if self.entries.len() > self.max_entries {
            self.evict_lru()
        } else {
            None
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())?;
        self.entries
            .remove(&oldest_key)
            .map(|entry| (oldest_key, entry.value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
