//! SSTable builder — writes a complete table from a sorted snapshot.
//!
//! Consumes a memtable snapshot (or a compaction output chunk) in key
//! order and produces the on-disk layout described in the
//! [module docs](super). While iterating, the builder
//!
//! 1. adds each key to the bloom filter,
//! 2. emits a sparse-index entry for every 16th record (the first record
//!    is always indexed),
//! 3. appends the data record.
//!
//! It then writes the metadata block (min/max key), the index, the
//! length-prefixed bloom filter, and the trailer.
//!
//! # Atomicity
//!
//! Everything is written to `<path>.tmp`, fsynced, and renamed into
//! place; the directory is fsynced after the rename. A crash cannot leave
//! a partially-written table under the final name.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use tracing::info;

use crate::bloom::BloomFilter;
use crate::types::Entry;

use super::{
    sstable_file_name, SSTable, SSTableMeta, SstableError, BLOOM_FP_RATE, INDEX_INTERVAL,
};

/// Builds `<dir>/sstable_<id>.bin` from a sorted snapshot and opens it.
///
/// Returns the open table handle and its descriptor (level 0; compaction
/// re-levels the descriptor for deeper outputs). The snapshot must be
/// non-empty — an empty memtable flush is the caller's no-op.
pub fn flush(
    snapshot: &BTreeMap<Vec<u8>, Entry>,
    dir: &Path,
    id: u64,
) -> Result<(SSTable, SSTableMeta), SstableError> {
    if snapshot.is_empty() {
        return Err(SstableError::EmptyInput);
    }

    let final_path = dir.join(sstable_file_name(id));
    let tmp_path = dir.join(format!("{}.tmp", sstable_file_name(id)));

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    let mut writer = BufWriter::new(file);

    let mut bloom = BloomFilter::new(snapshot.len(), BLOOM_FP_RATE);
    let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
    let mut offset = 0u64;
    let mut max_seq = 0u64;

    // -- Data region --------------------------------------------------
    for (i, (key, entry)) in snapshot.iter().enumerate() {
        if i % INDEX_INTERVAL == 0 {
            index.push((key.clone(), offset));
        }
        bloom.add(key);
        max_seq = max_seq.max(entry.seq);

        writer.write_all(&entry.seq.to_le_bytes())?;
        writer.write_all(&[entry.kind.code()])?;
        writer.write_all(&(key.len() as u32).to_le_bytes())?;
        writer.write_all(&(entry.value.len() as u32).to_le_bytes())?;
        writer.write_all(key)?;
        writer.write_all(&entry.value)?;

        offset += (super::RECORD_HEADER_SIZE + key.len() + entry.value.len()) as u64;
    }

    let metadata_offset = offset;

    // -- Metadata block -----------------------------------------------
    let min_key = snapshot.keys().next().cloned().unwrap_or_default();
    let max_key = snapshot.keys().next_back().cloned().unwrap_or_default();
    writer.write_all(&(min_key.len() as u32).to_le_bytes())?;
    writer.write_all(&min_key)?;
    writer.write_all(&(max_key.len() as u32).to_le_bytes())?;
    writer.write_all(&max_key)?;

    // -- Sparse index -------------------------------------------------
    writer.write_all(&(index.len() as u64).to_le_bytes())?;
    for (key, data_offset) in &index {
        writer.write_all(&(key.len() as u32).to_le_bytes())?;
        writer.write_all(key)?;
        writer.write_all(&data_offset.to_le_bytes())?;
    }

    // -- Bloom filter -------------------------------------------------
    let filter_bytes = bloom.serialize();
    writer.write_all(&(filter_bytes.len() as u64).to_le_bytes())?;
    writer.write_all(&filter_bytes)?;

    // -- Trailer ------------------------------------------------------
    writer.write_all(&metadata_offset.to_le_bytes())?;

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| SstableError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;
    // Make the rename itself durable.
    File::open(dir)?.sync_all()?;

    let table = SSTable::open(&final_path, id)?;
    let meta = SSTableMeta {
        id,
        level: 0,
        min_key,
        max_key,
        max_seq,
        size_bytes: table.file_size(),
    };

    info!(
        id,
        entries = snapshot.len(),
        bytes = meta.size_bytes,
        path = %final_path.display(),
        "built SSTable"
    );

    Ok((table, meta))
}
