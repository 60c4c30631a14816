//! Memtable Module
//!
//! The mutable, in-memory write buffer of the storage engine: an ordered
//! map from key to the latest [`Entry`] for that key.
//!
//! ## Design Invariants
//!
//! - At most one entry per key; a newer put or delete replaces the older
//!   version in place (latest wins within the memtable).
//! - Sequence numbers strictly increase with insertion order — the single
//!   writer thread assigns them.
//! - Deletes are tombstone entries, not physical removal; the tombstone
//!   must out-live older SSTable versions of the key.
//!
//! ## Concurrency
//!
//! Many concurrent readers, one writer. The inner map sits behind an
//! `RwLock`; readers take the shared lock, the writer thread takes the
//! exclusive lock.
//!
//! ## Size accounting
//!
//! `approximate_size` sums a fixed 17-byte overhead per entry (4 checksum
//! + 2 key_len + 2 value_len + 1 op + 8 seq) plus key and value bytes
//! (zero for tombstones). The estimate exists solely to decide when the
//! engine rotates the memtable out for flushing.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::trace;

use crate::types::{Entry, HexKey, ENTRY_OVERHEAD};

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

struct MemtableInner {
    tree: BTreeMap<Vec<u8>, Entry>,
    approximate_size: usize,
}

/// In-memory sorted map of the latest version per key.
pub struct Memtable {
    inner: RwLock<MemtableInner>,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    /// Creates an empty memtable.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemtableInner {
                tree: BTreeMap::new(),
                approximate_size: 0,
            }),
        }
    }

    /// Inserts or replaces the entry for `key` with a put.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        trace!(seq, key = %HexKey(&key), "memtable put");
        self.insert(key, Entry::put(value, seq));
    }

    /// Inserts or replaces the entry for `key` with a tombstone.
    pub fn delete(&self, key: Vec<u8>, seq: u64) {
        trace!(seq, key = %HexKey(&key), "memtable delete");
        self.insert(key, Entry::tombstone(seq));
    }

    fn insert(&self, key: Vec<u8>, entry: Entry) {
        let key_len = key.len();
        let added = ENTRY_OVERHEAD + key_len + entry.value.len();

        let mut inner = self.write_inner();
        // An existing newer version wins (can only happen when a replay
        // revisits records).
        if matches!(inner.tree.get(&key), Some(old) if old.seq > entry.seq) {
            return;
        }
        if let Some(old) = inner.tree.insert(key, entry) {
            // Replaced an older version of the same key.
            let removed = ENTRY_OVERHEAD + key_len + old.value.len();
            inner.approximate_size = inner.approximate_size.saturating_sub(removed);
        }
        inner.approximate_size += added;
    }

    /// Returns the latest entry for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.read_inner().tree.get(key).cloned()
    }

    /// Copies the current contents as a sorted map, for flushing.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Entry> {
        self.read_inner().tree.clone()
    }

    /// Removes every entry and resets the size estimate.
    pub fn clear(&self) {
        let mut inner = self.write_inner();
        inner.tree.clear();
        inner.approximate_size = 0;
    }

    /// Approximate in-memory footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.read_inner().approximate_size
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.read_inner().tree.len()
    }

    /// True when no entry is present.
    pub fn is_empty(&self) -> bool {
        self.read_inner().tree.is_empty()
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, MemtableInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, MemtableInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A frozen memtable snapshot in flight to the flusher.
///
/// Read-only for the lifetime of the flush; at most one exists at a time.
/// Readers consult it between the active memtable and the SSTables. The
/// frozen WAL file backing this data is deleted by the flusher after the
/// SSTable it produces is named by a durable manifest.
pub struct FrozenMemtable {
    data: BTreeMap<Vec<u8>, Entry>,
    wal_path: std::path::PathBuf,
}

impl FrozenMemtable {
    /// Wraps a snapshot together with the path of its frozen WAL.
    pub fn new(data: BTreeMap<Vec<u8>, Entry>, wal_path: std::path::PathBuf) -> Self {
        Self { data, wal_path }
    }

    /// Latest entry for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.data.get(key)
    }

    /// The frozen snapshot, in key order.
    pub fn data(&self) -> &BTreeMap<Vec<u8>, Entry> {
        &self.data
    }

    /// Path of the frozen WAL file backing this snapshot.
    pub fn wal_path(&self) -> &std::path::Path {
        &self.wal_path
    }

    /// True when the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
