use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// A cached payload and the moment it was written.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub written_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            written_at: Instant::now(),
        }
    }

    /// Fresh iff `now - written_at <= ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.written_at.elapsed() <= ttl
    }
}

/// Key -> value store where freshness is decided by the reader.
///
/// The TTL is passed to [`get`](Self::get) rather than stored with the entry, so the same
/// map can hold short-lived quotes and longer-lived candle series. Stale entries are dropped
/// when a read finds them; there is no background sweep and no size bound.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the entries mutex, recovering from poison if necessary.
    ///
    /// A poisoned cache at worst serves a value that is about to be overwritten.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Return a snapshot of the value under `key` if it was written within `ttl`.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        let mut entries = self.lock_entries();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(ttl) => Some(entry.value.clone()),
            Some(_) => {
                debug!("Cache: evicting stale entry '{}'", key);
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.lock_entries().insert(key.into(), CacheEntry::new(value));
    }

    /// Remove one entry. Returns true if it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock_entries().remove(key).is_some()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
