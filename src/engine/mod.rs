//! # LSM Storage Engine
//!
//! The orchestrator: it owns the WAL, the active and immutable
//! memtables, the version set, the read cache, the write queue, and the
//! three background threads that move data between them.
//!
//! ## Thread roster
//!
//! 1. **Writer** — drains the write queue in batches; sole mutator of
//!    the active memtable, the sequence counter, and the WAL position.
//!    One `wal.flush()` per batch gives group-commit durability before
//!    completions resolve.
//! 2. **Flusher** — waits on the immutable-memtable slot; builds L0
//!    SSTables, installs new versions, persists the manifest, deletes
//!    the frozen WAL, and schedules compaction.
//! 3. **Compactor** — waits on a condition variable; runs leveled merge
//!    cycles while work exists and the engine is not paused.
//!
//! (The WAL additionally owns its group-commit syncer thread.)
//!
//! Readers are arbitrary caller threads; they never wait on any of the
//! above. A read captures the current [`TableVersion`] once and uses
//! that snapshot for its whole lookup, even while installs race it.
//!
//! ## Write flow
//!
//! `put`/`delete` enqueue a request and block on its completion handle
//! (`put_async`/`delete_async` return the handle instead). The writer
//! assigns the next sequence number, appends to the WAL, applies to the
//! memtable, and invalidates the cache per request; after the batch it
//! forces the WAL and resolves every completion. When the memtable
//! crosses its threshold the writer rotates it into the immutable slot
//! (renaming the WAL aside) and wakes the flusher; rotation waits while
//! a previous flush is still running — at most one is pending.
//!
//! ## Durability ordering
//!
//! Flush: build SSTable → fsync → install version → persist manifest
//! atomically → only then delete the frozen WAL. Compaction: install →
//! persist manifest → delete inputs. Recovery therefore never references
//! a deleted file, and acknowledged writes always have either a live WAL
//! or a manifest-listed SSTable. A startup sweep removes orphan SSTable
//! files the manifest does not name.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::HashSet,
    fmt::Write as _,
    fs, io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, RwLock,
    },
    thread,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::LruCache;
use crate::compaction::{self, CompactionError};
use crate::config::Config;
use crate::memtable::{FrozenMemtable, Memtable};
use crate::queue::{RequestOp, WriteHandle, WriteQueue, WriteRequest};
use crate::sstable::{self, sstable_file_name, SSTable, SstableError};
use crate::types::{Entry, EntryKind};
use crate::version::{self, TableVersion, VersionError, VersionSet};
use crate::wal::{self, Wal, WalError};

/// Live WAL file name under the data directory.
pub const WAL_FILE: &str = "log.bin";

/// Frozen WAL of the immutable memtable; exists only between rotation
/// and flush install.
pub const FROZEN_WAL_FILE: &str = "log.imm.bin";

/// Subdirectory holding SSTable files.
pub const SSTABLE_DIR: &str = "sstables";

const MAX_WRITE_BATCH: usize = 128;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from an SSTable read or build.
    #[error("SSTable error: {0}")]
    Sstable(#[from] SstableError),

    /// Error originating from manifest persistence or recovery.
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// Error originating from a compaction merge.
    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,

    /// Internal invariant violation (background thread failure, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Snapshot of engine state returned by [`Engine::stats`].
pub struct EngineStats {
    /// Approximate bytes in the active memtable.
    pub memtable_bytes: usize,

    /// True while an immutable memtable awaits flushing.
    pub immutable_pending: bool,

    /// `(table_count, total_bytes)` per level, L0 first.
    pub levels: Vec<(usize, u64)>,

    /// Entries currently in the read cache.
    pub cache_entries: usize,

    /// Next sequence number to be assigned.
    pub next_seq: u64,
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

struct CompactionState {
    needed: bool,
    in_progress: bool,
    paused: bool,
}

struct EngineShared {
    config: Config,
    sstable_dir: PathBuf,
    frozen_wal_path: PathBuf,

    wal: Wal,
    memtable: Memtable,
    immutable: RwLock<Option<Arc<FrozenMemtable>>>,
    versions: VersionSet,
    cache: LruCache,
    queue: WriteQueue,

    /// Next sequence number to assign.
    next_seq: AtomicU64,

    /// Last SSTable id assigned; shared by flusher and compactor so ids
    /// never collide or repeat.
    next_table_id: AtomicU64,

    shutdown: AtomicBool,

    /// Set when a background thread hit an unrecoverable error; writes
    /// fail fast from then on.
    fatal: AtomicBool,

    /// Guards transitions of the immutable slot. The writer waits here
    /// for the slot to empty, the flusher for it to fill, `flush()` for
    /// the install to finish.
    flush_mutex: Mutex<()>,
    flush_cv: Condvar,

    /// Serializes version edits (flusher, compactor, clear_data).
    edit_lock: Mutex<()>,

    compaction: Mutex<CompactionState>,
    compaction_cv: Condvar,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EngineShared {
    fn immutable_snapshot(&self) -> Option<Arc<FrozenMemtable>> {
        self.immutable
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_immutable(&self, value: Option<Arc<FrozenMemtable>>) {
        let _guard = lock_or_recover(&self.flush_mutex);
        *self
            .immutable
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
        self.flush_cv.notify_all();
    }

    fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
        let _guard = lock_or_recover(&self.flush_mutex);
        self.flush_cv.notify_all();
    }

    fn schedule_compaction(&self) {
        let mut state = lock_or_recover(&self.compaction);
        state.needed = true;
        drop(state);
        self.compaction_cv.notify_all();
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The storage engine handle. All background threads are owned here and
/// joined by `drop`.
pub struct Engine {
    shared: Arc<EngineShared>,
    writer: Option<thread::JoinHandle<()>>,
    flusher: Option<thread::JoinHandle<()>>,
    compactor: Option<thread::JoinHandle<()>>,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `config.data_dir`.
    ///
    /// Loads the manifest, opens every listed SSTable (a missing or
    /// corrupt table is fatal), sweeps orphan table files, replays the
    /// WAL(s), and starts the background threads.
    pub fn open(config: Config) -> Result<Self, EngineError> {
        let data_dir = config.data_dir.clone();
        let sstable_dir = data_dir.join(SSTABLE_DIR);
        fs::create_dir_all(&sstable_dir)?;

        // 1. Manifest → initial version.
        let mut initial = TableVersion::empty();
        let mut next_seq = 1u64;
        if let Some(state) = version::load_manifest(&data_dir)? {
            initial.flush_counter = state.flush_counter;
            next_seq = state.next_seq.max(1);
            for meta in state.tables {
                let path = sstable_dir.join(sstable_file_name(meta.id));
                let table = SSTable::open(&path, meta.id)?;
                initial.add_sstable(meta, Arc::new(table));
            }
        }

        // 2. Sweep SSTable files the manifest does not name.
        let live: HashSet<u64> = initial.all_metas().map(|m| m.id).collect();
        sweep_orphans(&sstable_dir, &live)?;

        // 3. WAL.
        let wal = Wal::open(
            data_dir.join(WAL_FILE),
            config.wal_sync_interval_ms,
            config.wal_buffer_bytes,
        )?;

        let flush_counter = initial.flush_counter;
        let shared = Arc::new(EngineShared {
            sstable_dir,
            frozen_wal_path: data_dir.join(FROZEN_WAL_FILE),
            wal,
            memtable: Memtable::new(),
            immutable: RwLock::new(None),
            versions: VersionSet::new(initial),
            cache: LruCache::new(config.cache_size),
            queue: WriteQueue::new(config.write_queue_depth),
            next_seq: AtomicU64::new(next_seq),
            next_table_id: AtomicU64::new(flush_counter),
            shutdown: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            flush_mutex: Mutex::new(()),
            flush_cv: Condvar::new(),
            edit_lock: Mutex::new(()),
            compaction: Mutex::new(CompactionState {
                needed: false,
                in_progress: false,
                paused: false,
            }),
            compaction_cv: Condvar::new(),
            config,
        });

        let mut engine = Self {
            shared,
            writer: None,
            flusher: None,
            compactor: None,
        };

        // 4. Replay WALs before any thread runs.
        engine.recover()?;

        // 5. Background threads.
        engine.writer = Some(spawn_thread("loamdb-writer", &engine.shared, writer_loop)?);
        engine.flusher = Some(spawn_thread("loamdb-flusher", &engine.shared, flusher_loop)?);
        engine.compactor = Some(spawn_thread(
            "loamdb-compactor",
            &engine.shared,
            compactor_loop,
        )?);

        // An interrupted flush leaves a frozen memtable to finish, and a
        // recovered tree may already be over its triggers.
        if engine.shared.immutable_snapshot().is_some() {
            let _guard = lock_or_recover(&engine.shared.flush_mutex);
            engine.shared.flush_cv.notify_all();
        }
        engine.shared.schedule_compaction();

        info!(
            data_dir = %engine.shared.config.data_dir.display(),
            next_seq = engine.shared.next_seq.load(Ordering::SeqCst),
            tables = engine.shared.versions.current().table_count(),
            "engine open"
        );

        Ok(engine)
    }

    /// Replays the frozen WAL (if an interrupted flush left one) and the
    /// live WAL, then advances the sequence counter one past the largest
    /// replayed seq.
    ///
    /// The frozen WAL's contents become an immutable memtable again, so
    /// the flusher redoes the interrupted flush; the live WAL rebuilds
    /// the active memtable.
    pub fn recover(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        let mut max_seq = 0u64;

        let frozen_path = shared.frozen_wal_path.clone();
        if fs::metadata(&frozen_path).map(|m| m.len() > 0).unwrap_or(false) {
            let frozen_table = Memtable::new();
            let replayed = wal::replay(&frozen_path, |seq, op, key, value| {
                max_seq = max_seq.max(seq);
                match op {
                    EntryKind::Put => frozen_table.put(key, value, seq),
                    EntryKind::Delete => frozen_table.delete(key, seq),
                }
            })?;
            if replayed > 0 {
                shared.set_immutable(Some(Arc::new(FrozenMemtable::new(
                    frozen_table.snapshot(),
                    frozen_path,
                ))));
                info!(records = replayed, "recovered interrupted flush from frozen WAL");
            } else {
                let _ = fs::remove_file(&frozen_path);
            }
        }

        let replayed = wal::replay(shared.wal.path(), |seq, op, key, value| {
            max_seq = max_seq.max(seq);
            match op {
                EntryKind::Put => shared.memtable.put(key, value, seq),
                EntryKind::Delete => shared.memtable.delete(key, seq),
            }
        })?;

        let mut next = shared.next_seq.load(Ordering::SeqCst);
        if max_seq >= next {
            next = max_seq + 1;
            shared.next_seq.store(next, Ordering::SeqCst);
        }

        info!(records = replayed, next_seq = next, "recovery complete");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Public write API
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites a key. Blocks until the write is durable;
    /// `false` means the write failed (I/O error or shutdown).
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.put_async(key, value).wait()
    }

    /// Like [`Engine::put`] but returns the completion handle instead of
    /// blocking.
    pub fn put_async(&self, key: Vec<u8>, value: Vec<u8>) -> WriteHandle {
        self.shared.queue.push(RequestOp::Put, key, value)
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// The returned boolean is a **best-effort** "existed before" answer
    /// derived from a lookup immediately prior to enqueueing the
    /// tombstone; it can be stale relative to concurrent writers. A
    /// failed or shut-down write always returns `false`.
    pub fn delete(&self, key: Vec<u8>) -> bool {
        let existed = matches!(self.get(&key), Ok(Some(_)));
        let ok = self.delete_async(key).wait();
        ok && existed
    }

    /// Enqueues a tombstone and returns the completion handle.
    pub fn delete_async(&self, key: Vec<u8>) -> WriteHandle {
        self.shared.queue.push(RequestOp::Delete, key, Vec::new())
    }

    /// Forces the active memtable to rotate and waits until its SSTable
    /// is installed. A no-op when the memtable is empty.
    pub fn flush(&self) -> Result<(), EngineError> {
        if !self.shared.queue.push(RequestOp::Rotate, Vec::new(), Vec::new()).wait() {
            return if self.shared.queue.is_shutdown() {
                Err(EngineError::ShutDown)
            } else {
                Err(EngineError::Internal("rotation failed".into()))
            };
        }

        let mut guard = lock_or_recover(&self.shared.flush_mutex);
        loop {
            if self.shared.is_fatal() {
                return Err(EngineError::Internal("flush thread failed".into()));
            }
            if self.shared.immutable_snapshot().is_none() {
                return Ok(());
            }
            guard = self
                .shared
                .flush_cv
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    // --------------------------------------------------------------------------------------------
    // Public read API
    // --------------------------------------------------------------------------------------------

    /// Point lookup. `Ok(None)` when the key is absent or deleted;
    /// `Err` only for I/O failures along the read path.
    ///
    /// Lookup order: cache → active memtable → immutable memtable →
    /// SSTables of the current version (every range-containing L0 table,
    /// then at most one table per deeper level); the entry with the
    /// highest seq wins.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, EngineError> {
        let shared = &self.shared;

        if let Some(entry) = shared.cache.get(key) {
            return Ok((!entry.is_tombstone()).then_some(entry));
        }

        if let Some(entry) = shared.memtable.get(key) {
            return Ok((!entry.is_tombstone()).then_some(entry));
        }

        if let Some(frozen) = shared.immutable_snapshot() {
            if let Some(entry) = frozen.get(key) {
                return Ok((!entry.is_tombstone()).then_some(entry.clone()));
            }
        }

        let version = shared.versions.current();
        let mut best: Option<Entry> = None;

        // L0 ranges may overlap: probe every containing table.
        for meta in version.level_tables(0).iter().rev() {
            if !meta.contains_key(key) {
                continue;
            }
            if let Some(handle) = version.find_sstable_by_id(meta.id) {
                if let Some(entry) = handle.get(key)? {
                    if best.as_ref().map_or(true, |b| entry.seq > b.seq) {
                        best = Some(entry);
                    }
                }
            }
        }

        // L1+ is non-overlapping: binary search by max_key, at most one
        // candidate per level.
        for level in 1..version.level_count() as u32 {
            let tables = version.level_tables(level);
            let idx = tables.partition_point(|m| m.max_key.as_slice() < key);
            if idx >= tables.len() || !tables[idx].contains_key(key) {
                continue;
            }
            if let Some(handle) = version.find_sstable_by_id(tables[idx].id) {
                if let Some(entry) = handle.get(key)? {
                    if best.as_ref().map_or(true, |b| entry.seq > b.seq) {
                        best = Some(entry);
                    }
                }
            }
        }

        match best {
            Some(entry) if !entry.is_tombstone() => {
                shared.cache.put(key, entry.clone());
                Ok(Some(entry))
            }
            _ => Ok(None),
        }
    }

    /// One-line-per-level report of the tree shape (the REPL's `ls`).
    pub fn ls(&self) -> String {
        let stats = self.stats();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "memtable: {} bytes{}",
            stats.memtable_bytes,
            if stats.immutable_pending {
                " (+1 immutable pending flush)"
            } else {
                ""
            }
        );
        for (level, (count, bytes)) in stats.levels.iter().enumerate() {
            let _ = writeln!(out, "L{}: {} tables, {} bytes", level, count, bytes);
        }
        let _ = write!(out, "cache: {} entries", stats.cache_entries);
        out
    }

    /// Snapshot of engine statistics.
    pub fn stats(&self) -> EngineStats {
        let version = self.shared.versions.current();
        let levels = (0..version.level_count() as u32)
            .map(|l| (version.level_tables(l).len(), version.level_size_bytes(l)))
            .collect();
        EngineStats {
            memtable_bytes: self.shared.memtable.approximate_size(),
            immutable_pending: self.shared.immutable_snapshot().is_some(),
            levels,
            cache_entries: self.shared.cache.len(),
            next_seq: self.shared.next_seq.load(Ordering::SeqCst),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Compaction control
    // --------------------------------------------------------------------------------------------

    /// Blocks until no compaction is scheduled or in progress. A paused
    /// engine's scheduled-but-unpicked work does not count.
    pub fn wait_for_compaction(&self) {
        let mut state = lock_or_recover(&self.shared.compaction);
        while (state.needed && !state.paused) || state.in_progress {
            state = self
                .shared
                .compaction_cv
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Stops the compactor from picking new work; in-flight work
    /// completes.
    pub fn pause_compaction(&self) {
        let mut state = lock_or_recover(&self.shared.compaction);
        state.paused = true;
        drop(state);
        self.shared.compaction_cv.notify_all();
    }

    /// Lets the compactor pick work again.
    pub fn resume_compaction(&self) {
        let mut state = lock_or_recover(&self.shared.compaction);
        state.paused = false;
        drop(state);
        self.shared.compaction_cv.notify_all();
    }

    /// Waits for compaction, then removes all on-disk state and resets
    /// in-memory state to empty. Sequence numbers and table ids keep
    /// counting — ids are never reused.
    pub fn clear_data(&self) -> Result<(), EngineError> {
        self.wait_for_compaction();

        // Let any pending flush finish first.
        {
            let mut guard = lock_or_recover(&self.shared.flush_mutex);
            while self.shared.immutable_snapshot().is_some() && !self.shared.is_fatal() {
                guard = self
                    .shared
                    .flush_cv
                    .wait(guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }

        let shared = &self.shared;
        let _edit_guard = lock_or_recover(&shared.edit_lock);

        let old = shared.versions.current();
        shared.memtable.clear();
        shared.wal.clear()?;
        let _ = fs::remove_file(&shared.frozen_wal_path);

        let mut edit = shared.versions.edit();
        edit.levels.clear();
        edit.sstables.clear();
        let installed = shared.versions.install(edit);
        version::persist_manifest(
            &shared.config.data_dir,
            &installed,
            shared.next_seq.load(Ordering::SeqCst),
        )?;

        for meta in old.all_metas() {
            let path = shared.sstable_dir.join(sstable_file_name(meta.id));
            if let Err(e) = fs::remove_file(&path) {
                warn!(id = meta.id, error = %e, "failed to remove SSTable during clear");
            }
        }
        shared.cache.clear();

        info!("cleared all data");
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine shutting down");

        // Writer: fail new pushes, drain what is queued, join.
        self.shared.queue.shutdown();
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                error!("writer thread panicked");
            }
        }
        // Fail anything that raced past the shutdown flag.
        for request in self.shared.queue.drain() {
            request.complete(false);
        }

        // Flusher: drains the immutable slot before exiting.
        {
            let _guard = lock_or_recover(&self.shared.flush_mutex);
            self.shared.flush_cv.notify_all();
        }
        if let Some(handle) = self.flusher.take() {
            if handle.join().is_err() {
                error!("flusher thread panicked");
            }
        }

        // Compactor: finishes its current cycle.
        {
            let _state = lock_or_recover(&self.shared.compaction);
            self.shared.compaction_cv.notify_all();
        }
        if let Some(handle) = self.compactor.take() {
            if handle.join().is_err() {
                error!("compactor thread panicked");
            }
        }
        // The WAL syncs and joins its own thread when `shared` drops.
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_thread(
    name: &str,
    shared: &Arc<EngineShared>,
    body: fn(Arc<EngineShared>),
) -> Result<thread::JoinHandle<()>, EngineError> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(name.into())
        .spawn(move || body(shared))
        .map_err(EngineError::Io)
}

fn sweep_orphans(sstable_dir: &std::path::Path, live: &HashSet<u64>) -> Result<(), EngineError> {
    for entry in fs::read_dir(sstable_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let id = name
            .strip_prefix("sstable_")
            .and_then(|rest| rest.strip_suffix(".bin"))
            .and_then(|digits| digits.parse::<u64>().ok());
        let is_tmp = name.ends_with(".tmp");

        match id {
            Some(id) if !live.contains(&id) => {
                info!(id, "removing orphan SSTable");
                let _ = fs::remove_file(entry.path());
            }
            None if is_tmp => {
                info!(file = %name, "removing interrupted SSTable build");
                let _ = fs::remove_file(entry.path());
            }
            _ => {}
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Writer thread
// ------------------------------------------------------------------------------------------------

fn writer_loop(shared: Arc<EngineShared>) {
    debug!("writer started");
    loop {
        let batch = shared.queue.pop_batch(MAX_WRITE_BATCH);
        if batch.is_empty() {
            if shared.queue.is_shutdown() {
                break;
            }
            continue;
        }

        let mut pending: Vec<WriteRequest> = Vec::with_capacity(batch.len());
        let mut rotate_requested = false;

        for request in batch {
            if shared.is_fatal() {
                request.complete(false);
                continue;
            }
            match request.op {
                RequestOp::Put => {
                    let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
                    shared
                        .wal
                        .append(EntryKind::Put, &request.key, &request.value, seq);
                    shared
                        .memtable
                        .put(request.key.clone(), request.value.clone(), seq);
                    shared.cache.invalidate(&request.key);
                    pending.push(request);
                }
                RequestOp::Delete => {
                    let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
                    shared.wal.append(EntryKind::Delete, &request.key, &[], seq);
                    shared.memtable.delete(request.key.clone(), seq);
                    shared.cache.invalidate(&request.key);
                    pending.push(request);
                }
                RequestOp::Rotate => {
                    rotate_requested = true;
                    pending.push(request);
                }
            }
        }

        // One fsync for the whole batch.
        let wal_ok = match shared.wal.flush() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "WAL flush failed; failing batch");
                false
            }
        };

        let mut rotate_ok = true;
        let over_threshold =
            shared.memtable.approximate_size() >= shared.config.memtable_threshold_bytes;
        if wal_ok && (rotate_requested || over_threshold) && !shared.memtable.is_empty() {
            if let Err(e) = rotate_memtable(&shared) {
                error!(error = %e, "memtable rotation failed");
                rotate_ok = false;
            }
        }

        for request in pending {
            let ok = match request.op {
                RequestOp::Rotate => wal_ok && rotate_ok,
                _ => wal_ok,
            };
            request.complete(ok);
        }
    }
    debug!("writer stopped");
}

/// Swaps the active memtable into the immutable slot and wakes the
/// flusher. Blocks while a previous flush is still running — at most one
/// immutable memtable exists at a time.
fn rotate_memtable(shared: &EngineShared) -> Result<(), EngineError> {
    {
        let mut guard = lock_or_recover(&shared.flush_mutex);
        while shared.immutable_snapshot().is_some() {
            if shared.is_fatal() {
                return Err(EngineError::Internal("flush thread failed".into()));
            }
            guard = shared
                .flush_cv
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    // Snapshot first, publish, then clear: a reader always sees the
    // rotating entries in at least one of the two places.
    let snapshot = shared.memtable.snapshot();
    shared.wal.rotate(&shared.frozen_wal_path)?;
    shared.set_immutable(Some(Arc::new(FrozenMemtable::new(
        snapshot,
        shared.frozen_wal_path.clone(),
    ))));
    shared.memtable.clear();

    debug!("memtable rotated to immutable slot");
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Flusher thread
// ------------------------------------------------------------------------------------------------

fn flusher_loop(shared: Arc<EngineShared>) {
    debug!("flusher started");
    loop {
        let frozen = {
            let mut guard = lock_or_recover(&shared.flush_mutex);
            loop {
                if let Some(frozen) = shared.immutable_snapshot() {
                    break frozen;
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    debug!("flusher stopped");
                    return;
                }
                guard = shared
                    .flush_cv
                    .wait(guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        match flush_frozen(&shared, &frozen) {
            Ok(()) => shared.set_immutable(None),
            Err(e) => {
                // In-memory and on-disk state would diverge if we kept
                // going.
                error!(error = %e, "flush failed; marking engine fatal");
                shared.mark_fatal();
                return;
            }
        }
    }
}

fn flush_frozen(shared: &EngineShared, frozen: &FrozenMemtable) -> Result<(), EngineError> {
    if frozen.is_empty() {
        let _ = fs::remove_file(frozen.wal_path());
        return Ok(());
    }

    let _edit_guard = lock_or_recover(&shared.edit_lock);

    let id = shared.next_table_id.fetch_add(1, Ordering::SeqCst) + 1;
    let (table, meta) = sstable::flush(frozen.data(), &shared.sstable_dir, id)?;
    let entries = frozen.data().len();

    let mut edit = shared.versions.edit();
    edit.flush_counter = shared.next_table_id.load(Ordering::SeqCst);
    edit.add_sstable(meta, Arc::new(table));
    let installed = shared.versions.install(edit);

    version::persist_manifest(
        &shared.config.data_dir,
        &installed,
        shared.next_seq.load(Ordering::SeqCst),
    )?;

    // Only now is the frozen WAL garbage.
    if let Err(e) = fs::remove_file(frozen.wal_path()) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove frozen WAL");
        }
    }

    shared.cache.clear();
    shared.schedule_compaction();

    info!(id, entries, "flushed memtable to L0");
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Compactor thread
// ------------------------------------------------------------------------------------------------

fn compactor_loop(shared: Arc<EngineShared>) {
    debug!("compactor started");
    loop {
        {
            let mut state = lock_or_recover(&shared.compaction);
            while (!state.needed || state.paused) && !shared.shutdown.load(Ordering::SeqCst) {
                state = shared
                    .compaction_cv
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if shared.shutdown.load(Ordering::SeqCst) {
                debug!("compactor stopped");
                return;
            }
            state.needed = false;
            state.in_progress = true;
        }

        let result = run_compaction_cycles(&shared);

        {
            let mut state = lock_or_recover(&shared.compaction);
            state.in_progress = false;
        }
        shared.compaction_cv.notify_all();

        if let Err(e) = result {
            error!(error = %e, "compaction failed; marking engine fatal");
            shared.mark_fatal();
            return;
        }
    }
}

/// Runs merge cycles until no level is over its trigger (or the engine
/// pauses or shuts down).
fn run_compaction_cycles(shared: &EngineShared) -> Result<(), EngineError> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let state = lock_or_recover(&shared.compaction);
            if state.paused {
                return Ok(());
            }
        }

        let version = shared.versions.current();
        let Some(job) = compaction::pick_compaction(&version, &shared.config) else {
            return Ok(());
        };

        let outcome = compaction::execute(
            &job,
            &version,
            &shared.config,
            &shared.sstable_dir,
            &shared.next_table_id,
        )?;

        {
            let _edit_guard = lock_or_recover(&shared.edit_lock);
            let mut edit = shared.versions.edit();
            edit.remove_sstables_by_ids(&outcome.job.input_ids);
            for (table, meta) in outcome.outputs {
                edit.add_sstable(meta, Arc::new(table));
            }
            edit.flush_counter = shared.next_table_id.load(Ordering::SeqCst);
            let installed = shared.versions.install(edit);
            version::persist_manifest(
                &shared.config.data_dir,
                &installed,
                shared.next_seq.load(Ordering::SeqCst),
            )?;
        }

        // The manifest no longer names the inputs; now they may go.
        for id in &outcome.job.input_ids {
            let path = shared.sstable_dir.join(sstable_file_name(*id));
            if let Err(e) = fs::remove_file(&path) {
                warn!(id, error = %e, "failed to remove compacted input");
            }
        }
        shared.cache.clear();
    }
}
