//! Time-bounded memo cells for subprocess-backed queries.
//!
//! Every lookup takes an explicit `now` so expiry is testable without
//! sleeping. Expired entries are treated as absent; `invalidate` drops
//! everything regardless of age.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Caches a single value for a fixed TTL.
#[derive(Debug)]
pub struct TtlCell<T> {
    ttl: Duration,
    slot: Option<(Instant, T)>,
}

impl<T: Clone> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: None }
    }

    pub fn get(&self, now: Instant) -> Option<T> {
        let (stored_at, value) = self.slot.as_ref()?;
        if now.saturating_duration_since(*stored_at) < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&mut self, value: T, now: Instant) {
        self.slot = Some((now, value));
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
    }
}

/// Caches values per key, each with its own insertion time.
#[derive(Debug)]
pub struct TtlMap<K, V> {
    ttl: Duration,
    entries: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlMap<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K, now: Instant) -> Option<V> {
        let (stored_at, value) = self.entries.get(key)?;
        if now.saturating_duration_since(*stored_at) < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, (now, value));
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }
}
