//! Sorted String Table (SSTable) Module
//!
//! An SSTable is an **immutable**, sorted on-disk run of entries. The
//! flusher writes one per rotated memtable (level 0); compaction rewrites
//! them into deeper, non-overlapping levels. Once renamed into place a
//! file is never mutated.
//!
//! # On-disk layout
//!
//! Four regions, in file order, followed by an 8-byte trailer:
//!
//! ```text
//! [data region]        seq(u64) | kind(u8) | key_len(u32) | value_len(u32) | key | value ...
//! [metadata block]     min_key_len(u32) | min_key | max_key_len(u32) | max_key
//! [sparse index]       index_len(u64) | { key_len(u32) | key | data_offset(u64) } ...
//! [bloom filter]       filter_len(u64) | serialized filter
//! [trailer]            metadata_offset(u64)
//! ```
//!
//! All integers little-endian. Data records are sorted by key, one record
//! per key (`kind` 2 marks a tombstone with an empty value). The sparse
//! index holds every 16th key (the first always included), so a point
//! lookup binary-searches the index and scans at most one 16-record
//! window of the data region.
//!
//! # Concurrency model
//!
//! Reads go through a shared `Mmap` and are lock-free; any number of
//! readers may probe the same table concurrently. Handles are reference
//! counted by the table versions that list them; the mapping drops with
//! the last version holding it.
//!
//! # Integrity
//!
//! The file is fsynced and atomically renamed into place by the builder;
//! WAL records are individually checksummed upstream, and a table is only
//! named by the manifest after it is durable. Unreadable metadata at open
//! is fatal: the engine refuses to open.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

pub mod builder;
pub mod iterator;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{collections::BTreeMap, fs::File, io, path::PathBuf};

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::bloom::{BloomError, BloomFilter};
use crate::types::{Entry, EntryKind, HexKey};

pub use builder::flush;
pub use iterator::SstIterator;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// One sparse-index entry is emitted for every this many data records.
pub(crate) const INDEX_INTERVAL: usize = 16;

/// Target false-positive rate of the per-table bloom filter.
pub(crate) const BLOOM_FP_RATE: f64 = 0.01;

/// seq(8) + kind(1) + key_len(4) + value_len(4).
pub(crate) const RECORD_HEADER_SIZE: usize = 17;

const TRAILER_SIZE: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SstableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file's metadata, index, or a data record is unreadable.
    #[error("corrupt SSTable: {0}")]
    Corrupt(String),

    /// The embedded bloom filter failed to decode.
    #[error("corrupt SSTable bloom filter: {0}")]
    Bloom(#[from] BloomError),

    /// A builder was handed an empty snapshot.
    #[error("refusing to build an empty SSTable")]
    EmptyInput,
}

// ------------------------------------------------------------------------------------------------
// Metadata descriptor
// ------------------------------------------------------------------------------------------------

/// In-memory descriptor of a live SSTable, as tracked by table versions
/// and persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// Unique 64-bit id, never reused across the engine's lifetime.
    pub id: u64,

    /// Level this table currently belongs to.
    pub level: u32,

    /// First key of the data region.
    pub min_key: Vec<u8>,

    /// Last key of the data region.
    pub max_key: Vec<u8>,

    /// Highest sequence number present in the table.
    pub max_seq: u64,

    /// File size in bytes.
    pub size_bytes: u64,
}

impl SSTableMeta {
    /// True when `key` falls inside `[min_key, max_key]`.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.min_key.as_slice() <= key && key <= self.max_key.as_slice()
    }

    /// True when `[lo, hi]` intersects this table's key range.
    pub fn overlaps(&self, lo: &[u8], hi: &[u8]) -> bool {
        self.min_key.as_slice() <= hi && lo <= self.max_key.as_slice()
    }
}

/// Canonical file name of the table with the given id.
pub fn sstable_file_name(id: u64) -> String {
    format!("sstable_{}.bin", id)
}

// ------------------------------------------------------------------------------------------------
// Slice cursor
// ------------------------------------------------------------------------------------------------

/// Bounds-checked forward cursor over a byte slice.
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, SstableError> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, SstableError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, SstableError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], SstableError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                SstableError::Corrupt(format!(
                    "read of {} bytes at offset {} past end of file ({} bytes)",
                    len,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Decodes one data record starting at `pos`. Returns borrowed key and
/// value slices plus the offset of the next record.
pub(crate) fn read_record(
    data: &[u8],
    pos: usize,
) -> Result<(&[u8], &[u8], u64, EntryKind, usize), SstableError> {
    let mut reader = SliceReader::new(data, pos);
    let seq = reader.read_u64()?;
    let kind_code = reader.read_u8()?;
    let kind = EntryKind::from_code(kind_code)
        .ok_or_else(|| SstableError::Corrupt(format!("bad record kind {}", kind_code)))?;
    let key_len = reader.read_u32()? as usize;
    let value_len = reader.read_u32()? as usize;
    let key = reader.take(key_len)?;
    let value = reader.take(value_len)?;
    Ok((key, value, seq, kind, reader.pos()))
}

// ------------------------------------------------------------------------------------------------
// SSTable reader
// ------------------------------------------------------------------------------------------------

pub(crate) struct IndexEntry {
    pub(crate) key: Vec<u8>,
    pub(crate) offset: u64,
}

/// An open, memory-mapped SSTable.
pub struct SSTable {
    id: u64,
    path: PathBuf,
    mmap: Mmap,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    /// Offset one past the data region (== metadata block offset).
    data_end: u64,
}

impl SSTable {
    /// Opens and validates the table at `path`.
    ///
    /// Unreadable or inconsistent metadata is an error — the caller must
    /// treat it as fatal rather than serving partial data.
    pub fn open(path: impl Into<PathBuf>, id: u64) -> Result<Self, SstableError> {
        let path = path.into();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < TRAILER_SIZE {
            return Err(SstableError::Corrupt(format!(
                "file too small for trailer: {} bytes",
                mmap.len()
            )));
        }

        let trailer_pos = mmap.len() - TRAILER_SIZE;
        let metadata_offset =
            u64::from_le_bytes(mmap[trailer_pos..].try_into().unwrap());
        if metadata_offset as usize > trailer_pos {
            return Err(SstableError::Corrupt(format!(
                "metadata offset {} past trailer at {}",
                metadata_offset, trailer_pos
            )));
        }

        let mut reader = SliceReader::new(&mmap[..trailer_pos], metadata_offset as usize);

        let min_key_len = reader.read_u32()? as usize;
        let min_key = reader.take(min_key_len)?.to_vec();
        let max_key_len = reader.read_u32()? as usize;
        let max_key = reader.take(max_key_len)?.to_vec();

        let index_len = reader.read_u64()? as usize;
        let mut index = Vec::with_capacity(index_len);
        for _ in 0..index_len {
            let key_len = reader.read_u32()? as usize;
            let key = reader.take(key_len)?.to_vec();
            let offset = reader.read_u64()?;
            if offset > metadata_offset {
                return Err(SstableError::Corrupt(format!(
                    "index offset {} past data region end {}",
                    offset, metadata_offset
                )));
            }
            index.push(IndexEntry { key, offset });
        }

        let filter_len = reader.read_u64()? as usize;
        let filter_bytes = reader.take(filter_len)?;
        let bloom = BloomFilter::deserialize(filter_bytes)?;

        debug!(
            id,
            path = %path.display(),
            index_entries = index.len(),
            data_bytes = metadata_offset,
            "opened SSTable"
        );

        Ok(Self {
            id,
            path,
            mmap,
            min_key,
            max_key,
            index,
            bloom,
            data_end: metadata_offset,
        })
    }

    /// Point lookup. Returns the stored entry for `key` — put or
    /// tombstone — or `None` when the table cannot contain it.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, SstableError> {
        if key < self.min_key.as_slice() || key > self.max_key.as_slice() {
            return Ok(None);
        }
        if !self.bloom.contains(key) {
            trace!(id = self.id, key = %HexKey(key), "bloom filter miss");
            return Ok(None);
        }

        // Scan window: from the greatest index key <= `key` up to the
        // next index key (or the end of the data region).
        let idx = self.index.partition_point(|e| e.key.as_slice() <= key);
        let lo = if idx == 0 {
            0
        } else {
            self.index[idx - 1].offset as usize
        };
        let hi = if idx < self.index.len() {
            self.index[idx].offset as usize
        } else {
            self.data_end as usize
        };

        let mut pos = lo;
        while pos < hi {
            let (record_key, value, seq, kind, next) = read_record(&self.mmap, pos)?;
            if record_key == key {
                return Ok(Some(Entry {
                    value: value.to_vec(),
                    seq,
                    kind,
                }));
            }
            if record_key > key {
                break;
            }
            pos = next;
        }
        Ok(None)
    }

    /// Streaming iterator over all records in key order.
    pub fn iter(&self) -> SstIterator<'_> {
        SstIterator::new(self)
    }

    /// Collects the whole table into a sorted map.
    pub fn get_data(&self) -> Result<BTreeMap<Vec<u8>, Entry>, SstableError> {
        let mut map = BTreeMap::new();
        for record in self.iter() {
            let (key, entry) = record?;
            map.insert(key, entry);
        }
        Ok(map)
    }

    /// Unique table id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// First key of the data region.
    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    /// Last key of the data region.
    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    /// Size of the backing file in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub(crate) fn data_end(&self) -> u64 {
        self.data_end
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }
}
