//! Small TTL cache for rules and settings.
//!
//! Owned by the component that writes the cached data, which invalidates
//! the entry on every write. There is no process-wide cache.

use parking_lot::RwLock;
use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

pub struct TtlCache<K, V> {
    ttl:     Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// A zero TTL disables caching: every lookup goes to the loader.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.write().insert(key, (Instant::now(), value));
    }

    /// Return the cached value, or load, cache and return it.
    /// Loader errors are returned as-is and nothing is cached.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let value = load()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.write().remove(key);
    }
}
