//! Version / Manifest Module
//!
//! A [`TableVersion`] is an **immutable snapshot** of the live SSTable
//! set: per-level descriptor lists plus reference-counted handles to the
//! open tables. The engine publishes the current version through an
//! atomic pointer swap; readers load the pointer once and keep using that
//! snapshot for the whole read, even while a flush or compaction installs
//! a newer one. Handles drop with the last version that references them.
//!
//! ## Edit discipline
//!
//! Only the flusher and the compactor edit: `edit()` deep-copies the
//! current version with `version_number + 1`, the caller mutates the
//! copy, `install()` publishes it. The two editors are serialized by an
//! engine-level lock; readers never block.
//!
//! ## Level invariants
//!
//! - L0 is ordered by id, newest last; ranges may overlap.
//! - L1 and deeper are ordered by `min_key` with non-overlapping ranges
//!   within a level.
//! - Every id listed in `levels` has a handle in `sstables`, and every
//!   handle is listed in some level.
//!
//! ## Persistence
//!
//! Two text files under the data directory, rewritten after every
//! install:
//!
//! ```text
//! metadata.txt     flush_counter \n next_seq \n
//! levels.txt       id level min_key max_key max_seq size_bytes
//! ```
//!
//! Keys are hex-encoded with a `0x` prefix so arbitrary byte keys —
//! whitespace, empty keys included — survive the whitespace-delimited
//! format. Both files are written to a temp path, fsynced, renamed into
//! place, and the directory is fsynced.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::{debug, info};

use crate::sstable::{SSTable, SSTableMeta};

/// File carrying the id allocator and sequence counter.
pub const METADATA_FILE: &str = "metadata.txt";

/// File enumerating every live SSTable.
pub const LEVELS_FILE: &str = "levels.txt";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by version persistence and lookup.
#[derive(Debug, Error)]
pub enum VersionError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A manifest file exists but cannot be parsed.
    #[error("corrupt manifest: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// TableVersion
// ------------------------------------------------------------------------------------------------

/// Immutable snapshot of the live SSTable set.
#[derive(Clone)]
pub struct TableVersion {
    /// `levels[l]` holds the descriptors at level `l`. L0 ordered by id
    /// (newest last); L1+ ordered by min_key, non-overlapping.
    pub levels: Vec<Vec<SSTableMeta>>,

    /// Open handles for every id referenced by `levels`.
    pub sstables: HashMap<u64, Arc<SSTable>>,

    /// Monotonic snapshot counter.
    pub version_number: u64,

    /// Last SSTable id assigned (ids are never reused).
    pub flush_counter: u64,
}

impl TableVersion {
    /// A version with no tables.
    pub fn empty() -> Self {
        Self {
            levels: Vec::new(),
            sstables: HashMap::new(),
            version_number: 0,
            flush_counter: 0,
        }
    }

    /// Handle lookup by id.
    pub fn find_sstable_by_id(&self, id: u64) -> Option<Arc<SSTable>> {
        self.sstables.get(&id).cloned()
    }

    /// Adds a table at `meta.level`, keeping the level's ordering
    /// invariant (id order at L0, min_key order deeper).
    pub fn add_sstable(&mut self, meta: SSTableMeta, handle: Arc<SSTable>) {
        let level = meta.level as usize;
        while self.levels.len() <= level {
            self.levels.push(Vec::new());
        }

        self.sstables.insert(meta.id, handle);
        let tables = &mut self.levels[level];
        if level == 0 {
            let at = tables.partition_point(|t| t.id <= meta.id);
            tables.insert(at, meta);
        } else {
            let at = tables.partition_point(|t| t.min_key <= meta.min_key);
            tables.insert(at, meta);
        }
    }

    /// Removes the listed ids from every level and drops their handles.
    pub fn remove_sstables_by_ids(&mut self, ids: &[u64]) {
        for level in &mut self.levels {
            level.retain(|meta| !ids.contains(&meta.id));
        }
        for id in ids {
            self.sstables.remove(id);
        }
    }

    /// Descriptors at `level` (empty slice beyond the deepest level).
    pub fn level_tables(&self, level: u32) -> &[SSTableMeta] {
        self.levels
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of levels with storage allocated (trailing levels may be
    /// empty).
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Total size of `level` in bytes.
    pub fn level_size_bytes(&self, level: u32) -> u64 {
        self.level_tables(level).iter().map(|m| m.size_bytes).sum()
    }

    /// Every descriptor across all levels.
    pub fn all_metas(&self) -> impl Iterator<Item = &SSTableMeta> {
        self.levels.iter().flatten()
    }

    /// Total number of live tables.
    pub fn table_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

// ------------------------------------------------------------------------------------------------
// VersionSet
// ------------------------------------------------------------------------------------------------

/// Publishes the current [`TableVersion`] via an atomic pointer swap.
pub struct VersionSet {
    current: ArcSwap<TableVersion>,
}

impl VersionSet {
    /// Starts from the given version (usually recovered or empty).
    pub fn new(initial: TableVersion) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The current snapshot. Callers keep the `Arc` for the duration of
    /// their read; it stays valid across concurrent installs.
    pub fn current(&self) -> Arc<TableVersion> {
        self.current.load_full()
    }

    /// Deep copy of the current version with `version_number` bumped,
    /// ready for mutation. Metadata lists are small and handles are
    /// refcounted, so the copy is cheap.
    pub fn edit(&self) -> TableVersion {
        let current = self.current.load();
        let mut copy = TableVersion::clone(&current);
        copy.version_number += 1;
        copy
    }

    /// Atomically publishes `version` as current.
    pub fn install(&self, version: TableVersion) -> Arc<TableVersion> {
        let arc = Arc::new(version);
        self.current.store(Arc::clone(&arc));
        debug!(
            version = arc.version_number,
            tables = arc.table_count(),
            "installed table version"
        );
        arc
    }
}

// ------------------------------------------------------------------------------------------------
// Key hex encoding
// ------------------------------------------------------------------------------------------------

/// `0x`-prefixed lowercase hex; the empty key encodes as `0x`.
fn encode_key(key: &[u8]) -> String {
    let mut out = String::with_capacity(2 + key.len() * 2);
    out.push_str("0x");
    for byte in key {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn decode_key(text: &str) -> Result<Vec<u8>, VersionError> {
    let hex = text
        .strip_prefix("0x")
        .ok_or_else(|| VersionError::Corrupt(format!("key field missing 0x prefix: {text:?}")))?;
    if hex.len() % 2 != 0 {
        return Err(VersionError::Corrupt(format!("odd hex length: {text:?}")));
    }
    let mut key = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        let byte = u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| VersionError::Corrupt(format!("bad hex digit in key: {text:?}")))?;
        key.push(byte);
    }
    Ok(key)
}

// ------------------------------------------------------------------------------------------------
// Manifest persistence
// ------------------------------------------------------------------------------------------------

/// Counters and table list recovered from a manifest.
pub struct ManifestState {
    pub flush_counter: u64,
    pub next_seq: u64,
    pub tables: Vec<SSTableMeta>,
}

/// Writes `contents` at `path` atomically: temp file, fsync, rename.
fn atomic_write(dir: &Path, name: &str, contents: &str) -> Result<(), VersionError> {
    let final_path = dir.join(name);
    let tmp_path = dir.join(format!("{name}.tmp"));

    let mut file = File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Rewrites `metadata.txt` and `levels.txt` from `version`, atomically,
/// and fsyncs the directory so the renames are durable.
pub fn persist_manifest(
    data_dir: &Path,
    version: &TableVersion,
    next_seq: u64,
) -> Result<(), VersionError> {
    let metadata = format!("{}\n{}\n", version.flush_counter, next_seq);
    atomic_write(data_dir, METADATA_FILE, &metadata)?;

    let mut levels = String::new();
    for meta in version.all_metas() {
        levels.push_str(&format!(
            "{} {} {} {} {} {}\n",
            meta.id,
            meta.level,
            encode_key(&meta.min_key),
            encode_key(&meta.max_key),
            meta.max_seq,
            meta.size_bytes
        ));
    }
    atomic_write(data_dir, LEVELS_FILE, &levels)?;

    File::open(data_dir)?.sync_all()?;

    debug!(
        flush_counter = version.flush_counter,
        next_seq,
        tables = version.table_count(),
        "persisted manifest"
    );
    Ok(())
}

/// Loads the manifest pair, or `None` when no manifest exists yet.
///
/// A present-but-unparsable manifest is an error: the engine refuses to
/// open rather than silently dropping tables.
pub fn load_manifest(data_dir: &Path) -> Result<Option<ManifestState>, VersionError> {
    let metadata_path = data_dir.join(METADATA_FILE);
    let metadata = match fs::read_to_string(&metadata_path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VersionError::Io(e)),
    };

    let mut lines = metadata.lines();
    let flush_counter = parse_u64(lines.next(), "flush_counter")?;
    let next_seq = parse_u64(lines.next(), "next_seq")?;

    let levels_path = data_dir.join(LEVELS_FILE);
    let levels_text = match fs::read_to_string(&levels_path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(VersionError::Io(e)),
    };

    let mut tables = Vec::new();
    for (line_no, line) in levels_text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(VersionError::Corrupt(format!(
                "levels.txt line {}: expected 6 fields, got {}",
                line_no + 1,
                fields.len()
            )));
        }
        tables.push(SSTableMeta {
            id: parse_u64(Some(fields[0]), "id")?,
            level: parse_u64(Some(fields[1]), "level")? as u32,
            min_key: decode_key(fields[2])?,
            max_key: decode_key(fields[3])?,
            max_seq: parse_u64(Some(fields[4]), "max_seq")?,
            size_bytes: parse_u64(Some(fields[5]), "size_bytes")?,
        });
    }

    info!(
        flush_counter,
        next_seq,
        tables = tables.len(),
        "loaded manifest"
    );

    Ok(Some(ManifestState {
        flush_counter,
        next_seq,
        tables,
    }))
}

fn parse_u64(field: Option<&str>, what: &str) -> Result<u64, VersionError> {
    field
        .map(str::trim)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| VersionError::Corrupt(format!("missing or invalid {what}")))
}
