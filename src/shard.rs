//! Sharded concurrent map used for all monitor bookkeeping.
//!
//! Keys are spread over a fixed number of `RwLock<HashMap>` shards, so
//! operations on unrelated keys rarely touch the same lock. Each operation is
//! atomic for its key; nothing here is atomic across keys.

use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use parking_lot::RwLock;

const DEFAULT_SHARDS: usize = 16;

pub(crate) struct ShardedMap<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: RandomState,
}

impl<K: Eq + Hash, V> ShardedMap<K, V> {
    pub(crate) fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Shard count is rounded up to a power of two.
    pub(crate) fn with_shards(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let index = (self.hasher.hash_one(key) as usize) & (self.shards.len() - 1);
        &self.shards[index]
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    pub(crate) fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    /// Store `value`, returning whatever was there before.
    pub(crate) fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    /// Store `value` only if `key` is vacant. Returns `true` if it was stored.
    pub(crate) fn insert_if_absent(&self, key: K, value: V) -> bool {
        match self.shard(&key).write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Return the value for `key`, creating it with `make` on a miss.
    ///
    /// The hit path only takes the shard's read lock.
    pub(crate) fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        let shard = self.shard(&key);
        if let Some(value) = shard.read().get(&key) {
            return value.clone();
        }
        shard.write().entry(key).or_insert_with(make).clone()
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Remove the entry for `key` only if `predicate` accepts its value.
    pub(crate) fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut shard = self.shard(key).write();
        if shard.get(key).is_some_and(predicate) {
            shard.remove(key)
        } else {
            None
        }
    }

    /// Modify the value under `key` in place. Returns `false` if it is absent.
    pub(crate) fn update(&self, key: &K, apply: impl FnOnce(&mut V)) -> bool {
        match self.shard(key).write().get_mut(key) {
            Some(value) => {
                apply(value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}
