//! Compaction Module
//!
//! Leveled compaction: L0 holds possibly-overlapping memtable flushes;
//! L1 and deeper hold non-overlapping sorted runs under per-level size
//! budgets that grow by 10x per level.
//!
//! ## Trigger policy
//!
//! - **L0 → L1** when L0 holds at least `l0_trigger` tables (default 4).
//! - **Ln → Ln+1** (n ≥ 1) when the level's total size exceeds its
//!   budget (L1 10 MiB, L2 100 MiB, L3 1 GiB, x10 beyond).
//!
//! ## Input selection
//!
//! - L0 → L1 takes **all** of L0 (the tables may mutually overlap),
//!   unions their key ranges, and adds every L1 table intersecting the
//!   union.
//! - Ln → Ln+1 takes the first Ln table in min_key order plus every
//!   Ln+1 table intersecting its range.
//!
//! ## Merge
//!
//! One streaming iterator per input feeds a min-heap ordered by
//! (key asc, seq desc), so the newest version of each key pops first.
//! Only the winner per key survives. A winning tombstone is written
//! through to the output **unless every level deeper than the output is
//! empty** — only then can no older put for the key resurface, so the
//! tombstone has nothing left to suppress. Outputs are split at a size
//! bound and take fresh ids from the engine's shared id allocator.
//!
//! The module plans and executes merges; the engine's compactor thread
//! owns scheduling, version installation, manifest persistence, and
//! input-file deletion (in that order, so recovery never references a
//! deleted file).

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap},
    path::Path,
    sync::{atomic::AtomicU64, Arc},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::sstable::{self, SSTable, SSTableMeta, SstIterator, SstableError};
use crate::types::Entry;
use crate::version::TableVersion;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by compaction execution.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Reading an input or writing an output failed.
    #[error("SSTable error: {0}")]
    Sstable(#[from] SstableError),

    /// An input id had no open handle in the version snapshot.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Planning
// ------------------------------------------------------------------------------------------------

/// One planned merge: which tables to consume and where the output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionJob {
    pub source_level: u32,
    pub target_level: u32,

    /// Inputs from both the source and target levels.
    pub input_ids: Vec<u64>,
}

/// Result of an executed merge, ready for the engine to install.
pub struct CompactionOutcome {
    pub job: CompactionJob,
    pub outputs: Vec<(SSTable, SSTableMeta)>,
}

/// True when any level needs compacting under the trigger policy.
pub fn needs_compaction(version: &TableVersion, config: &Config) -> bool {
    pick_compaction(version, config).is_some()
}

/// Scans L0 downward and returns the first triggered job, or `None`.
pub fn pick_compaction(version: &TableVersion, config: &Config) -> Option<CompactionJob> {
    let l0 = version.level_tables(0);
    if l0.len() >= config.l0_trigger {
        // Union of all L0 ranges.
        let lo = l0.iter().map(|m| m.min_key.as_slice()).min()?;
        let hi = l0.iter().map(|m| m.max_key.as_slice()).max()?;

        let mut input_ids: Vec<u64> = l0.iter().map(|m| m.id).collect();
        input_ids.extend(
            version
                .level_tables(1)
                .iter()
                .filter(|m| m.overlaps(lo, hi))
                .map(|m| m.id),
        );

        return Some(CompactionJob {
            source_level: 0,
            target_level: 1,
            input_ids,
        });
    }

    for level in 1..version.level_count() as u32 {
        let size = version.level_size_bytes(level);
        if size <= config.level_budget(level) {
            continue;
        }

        // First table in min_key order, plus everything it overlaps in
        // the next level down.
        let tables = version.level_tables(level);
        let first = tables.first()?;
        let mut input_ids = vec![first.id];
        input_ids.extend(
            version
                .level_tables(level + 1)
                .iter()
                .filter(|m| m.overlaps(&first.min_key, &first.max_key))
                .map(|m| m.id),
        );

        debug!(
            level,
            size_bytes = size,
            budget = config.level_budget(level),
            "level over budget"
        );

        return Some(CompactionJob {
            source_level: level,
            target_level: level + 1,
            input_ids,
        });
    }

    None
}

// ------------------------------------------------------------------------------------------------
// Merge iterator
// ------------------------------------------------------------------------------------------------

struct HeapItem {
    key: Vec<u8>,
    entry: Entry,
    src: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.entry.seq == other.entry.seq
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    /// `BinaryHeap` is a max-heap; invert the key order so the smallest
    /// key pops first, and keep seq natural so the largest seq wins ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then(self.entry.seq.cmp(&other.entry.seq))
    }
}

/// Merges several sorted table streams into one (key asc, seq desc)
/// stream. Decode errors from any input abort the merge.
pub struct MergeIterator<'a> {
    sources: Vec<SstIterator<'a>>,
    heap: BinaryHeap<HeapItem>,
    failed: bool,
}

impl<'a> MergeIterator<'a> {
    /// Primes the heap with the head of each source.
    pub fn new(sources: Vec<SstIterator<'a>>) -> Result<Self, SstableError> {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
            failed: false,
        };
        for src in 0..merge.sources.len() {
            merge.advance(src)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, src: usize) -> Result<(), SstableError> {
        if let Some(item) = self.sources[src].next() {
            let (key, entry) = item?;
            self.heap.push(HeapItem { key, entry, src });
        }
        Ok(())
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<(Vec<u8>, Entry), SstableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let top = self.heap.pop()?;
        if let Err(e) = self.advance(top.src) {
            self.failed = true;
            return Some(Err(e));
        }
        Some(Ok((top.key, top.entry)))
    }
}

// ------------------------------------------------------------------------------------------------
// Execution
// ------------------------------------------------------------------------------------------------

/// Runs the planned merge against a version snapshot.
///
/// Output ids come from `id_alloc`, the engine's shared id counter, so
/// flushes racing this compaction can never collide with it. The caller
/// installs the outcome: new version, manifest, then input deletion.
pub fn execute(
    job: &CompactionJob,
    version: &TableVersion,
    config: &Config,
    sstable_dir: &Path,
    id_alloc: &AtomicU64,
) -> Result<CompactionOutcome, CompactionError> {
    let mut inputs: Vec<Arc<SSTable>> = Vec::with_capacity(job.input_ids.len());
    for id in &job.input_ids {
        let handle = version.find_sstable_by_id(*id).ok_or_else(|| {
            CompactionError::Internal(format!("input SSTable {id} has no open handle"))
        })?;
        inputs.push(handle);
    }

    // A tombstone can only be dropped when nothing older than the output
    // level could still hold a put for its key.
    let drop_tombstones = ((job.target_level + 1)..version.level_count() as u32)
        .all(|level| version.level_tables(level).is_empty());

    let merged = MergeIterator::new(inputs.iter().map(|table| table.iter()).collect())?;

    let mut outputs = Vec::new();
    let mut chunk: BTreeMap<Vec<u8>, Entry> = BTreeMap::new();
    let mut chunk_bytes = 0u64;
    let mut last_key: Option<Vec<u8>> = None;
    let mut dropped_tombstones = 0u64;
    let mut superseded = 0u64;

    for item in merged {
        let (key, entry) = item?;

        // The first occurrence of a key carries the highest seq; later
        // ones are superseded versions.
        if last_key.as_deref() == Some(key.as_slice()) {
            superseded += 1;
            continue;
        }
        last_key = Some(key.clone());

        if entry.is_tombstone() && drop_tombstones {
            dropped_tombstones += 1;
            continue;
        }

        chunk_bytes += (sstable::RECORD_HEADER_SIZE + key.len() + entry.value.len()) as u64;
        chunk.insert(key, entry);

        if chunk_bytes >= config.sstable_size_bytes {
            outputs.push(build_output(&chunk, sstable_dir, id_alloc, job.target_level)?);
            chunk.clear();
            chunk_bytes = 0;
        }
    }

    if !chunk.is_empty() {
        outputs.push(build_output(&chunk, sstable_dir, id_alloc, job.target_level)?);
    }

    info!(
        source_level = job.source_level,
        target_level = job.target_level,
        inputs = job.input_ids.len(),
        outputs = outputs.len(),
        superseded,
        dropped_tombstones,
        "compaction merge complete"
    );

    Ok(CompactionOutcome {
        job: job.clone(),
        outputs,
    })
}

fn build_output(
    chunk: &BTreeMap<Vec<u8>, Entry>,
    sstable_dir: &Path,
    id_alloc: &AtomicU64,
    target_level: u32,
) -> Result<(SSTable, SSTableMeta), CompactionError> {
    let id = id_alloc.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
    let (table, mut meta) = sstable::flush(chunk, sstable_dir, id)?;
    meta.level = target_level;
    Ok((table, meta))
}
