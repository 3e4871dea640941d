//! A concurrent map from keys to signed 64-bit counters.
//!
//! Keys are created on first update and discarded as soon as their counter
//! returns to exactly zero, so an absent key and a zero counter mean the
//! same thing. Useful for reference counts and per-key in-flight tracking.
//!
//! # Removal protocol
//!
//! Every update holds the removal guard in shared mode while it locates the
//! counter cell and applies the delta, so any number of updates proceed at
//! once. An update that lands on zero then takes the guard in exclusive mode
//! and removes the key only if the counter still reads zero. A concurrent
//! update that moved the counter away from zero in between therefore wins,
//! and no increment is ever applied to a cell that has left the map.
//!
//! [`CounterMap::remove`] bypasses the guard entirely. A forced removal that
//! races an in-flight update may or may not observe it, and the key may end
//! up absent or re-created. Callers use it for teardown, where that is fine.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};

/// Maps keys to `i64` counters. Thread-safe and removes keys at zero.
pub struct CounterMap<K> {
    counters: DashMap<K, AtomicI64>,
    removal_lock: RwLock<()>,
}

impl<K> CounterMap<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        CounterMap {
            counters: DashMap::new(),
            removal_lock: RwLock::new(()),
        }
    }

    /// Adds `delta` to the counter for `key`, creating it at zero first if
    /// absent, and returns the new value. A result of zero removes the key.
    pub fn add_and_get(&self, key: &K, delta: i64) -> i64 {
        let new_value = {
            let _updating = self.removal_lock.read();
            self.apply(key, delta).wrapping_add(delta)
        };

        if new_value == 0 {
            self.try_cleanup(key);
        }

        new_value
    }

    /// Adds `delta` to the counter for `key` and returns the value it held
    /// before the update. If the update lands on zero the key is removed.
    pub fn get_and_add(&self, key: &K, delta: i64) -> i64 {
        let old_value = {
            let _updating = self.removal_lock.read();
            self.apply(key, delta)
        };

        if old_value.wrapping_add(delta) == 0 {
            self.try_cleanup(key);
        }

        old_value
    }

    /// Applies `delta` and returns the previous value. Caller holds the guard.
    fn apply(&self, key: &K, delta: i64) -> i64 {
        if let Some(counter) = self.counters.get(key) {
            return counter.fetch_add(delta, Ordering::AcqRel);
        }
        // insert-if-absent; a counter created concurrently by another thread is kept
        self.counters
            .entry(key.clone())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::AcqRel)
    }

    fn try_cleanup(&self, key: &K) {
        let _exclusive = self.removal_lock.write();
        self.counters
            .remove_if(key, |_, counter| counter.load(Ordering::Acquire) == 0);
    }

    /// Returns the counter for `key`, or 0 if the key is absent.
    /// Never creates an entry.
    pub fn get(&self, key: &K) -> i64 {
        self.counters
            .get(key)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Unconditionally removes `key`, returning the value it held.
    pub fn remove(&self, key: &K) -> Option<i64> {
        self.counters
            .remove(key)
            .map(|(_, counter)| counter.into_inner())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.counters.contains_key(key)
    }

    /// Number of keys currently present. Weakly consistent under concurrent updates.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Returns a snapshot of the non-zero `(key, value)` pairs.
    ///
    /// The snapshot is taken shard by shard, so updates made while it is
    /// being taken may or may not appear, but no key appears twice. The map
    /// may be freely updated while the returned iterator is alive.
    pub fn iter(&self) -> Iter<K> {
        let entries: Vec<(K, i64)> = self
            .counters
            .iter()
            .filter_map(|entry| {
                let value = entry.value().load(Ordering::Acquire);
                // a zero here is a counter whose cleanup has not run yet
                (value != 0).then(|| (entry.key().clone(), value))
            })
            .collect();
        Iter {
            inner: entries.into_iter(),
        }
    }
}

impl<K> Default for CounterMap<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for CounterMap<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K> IntoIterator for &'a CounterMap<K>
where
    K: Eq + Hash + Clone,
{
    type Item = (K, i64);
    type IntoIter = Iter<K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a snapshot of a [`CounterMap`].
pub struct Iter<K> {
    inner: std::vec::IntoIter<(K, i64)>,
}

impl<K> Iterator for Iter<K> {
    type Item = (K, i64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for Iter<K> {}
