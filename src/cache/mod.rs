//! Read Cache Module
//!
//! A capacity-bounded key → [`Entry`] cache with least-recently-used
//! eviction, sitting in front of the whole read path. The writer thread
//! invalidates the touched key on every mutation; flush and compaction
//! clear the cache wholesale after installing a new table version, since
//! either may change which version of a key is authoritative on disk.
//!
//! Guarded by a single mutex — a miss is dominated by disk anyway, and
//! the hit path is a map probe plus two index updates.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use tracing::trace;

use crate::types::Entry;

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

struct CacheInner {
    /// Key → (entry, recency stamp).
    map: HashMap<Vec<u8>, (Entry, u64)>,

    /// Recency stamp → key; the smallest stamp is the LRU victim.
    recency: BTreeMap<u64, Vec<u8>>,

    /// Monotonic stamp source.
    tick: u64,
}

/// Mutex-guarded LRU cache of read results.
pub struct LruCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl LruCache {
    /// A cache holding at most `capacity` entries. Zero capacity disables
    /// caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            capacity,
        }
    }

    /// Returns the cached entry and marks the key most-recently-used.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let (entry, old_stamp) = {
            let (entry, stamp) = inner.map.get_mut(key)?;
            let old = *stamp;
            *stamp = tick;
            (entry.clone(), old)
        };
        inner.recency.remove(&old_stamp);
        inner.recency.insert(tick, key.to_vec());
        Some(entry)
    }

    /// Inserts or refreshes `key`, evicting the least-recently-used entry
    /// on overflow.
    pub fn put(&self, key: &[u8], entry: Entry) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some((_, old_stamp)) = inner.map.remove(key) {
            inner.recency.remove(&old_stamp);
        }
        inner.map.insert(key.to_vec(), (entry, tick));
        inner.recency.insert(tick, key.to_vec());

        while inner.map.len() > self.capacity {
            if let Some((_, victim)) = inner.recency.pop_first() {
                trace!(victim_len = victim.len(), "cache eviction");
                inner.map.remove(&victim);
            } else {
                break;
            }
        }
    }

    /// Drops `key` if cached. Called by the writer on every mutation.
    pub fn invalidate(&self, key: &[u8]) {
        let mut inner = self.lock();
        if let Some((_, stamp)) = inner.map.remove(key) {
            inner.recency.remove(&stamp);
        }
    }

    /// Drops everything. Called after flush and compaction installs.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.recency.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
