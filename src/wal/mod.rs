//! Write-Ahead Logging (WAL) Module
//!
//! Durable, append-only operation log with **group commit**. Every write
//! the engine acknowledges is staged here first; after a crash, replay
//! reconstructs the memtable exactly as it was at the last durable point.
//!
//! ## Design Overview
//!
//! Appends are cheap: the record is encoded and pushed onto an in-memory
//! staging buffer. A **syncer thread owned by the WAL** drains the buffer
//! to the file and fsyncs, woken either by a periodic timer (default
//! 10 ms), by the buffer crossing a high-water mark (default 256 KiB), or
//! by an explicit [`Wal::flush`]. Many writers thereby share one fsync
//! while each `flush` call still guarantees its own records are durable
//! before it returns.
//!
//! `flush` uses a generation counter: each call bumps the requested
//! generation, wakes the syncer, and waits on a condition variable until
//! the synced generation catches up.
//!
//! # On-disk layout
//!
//! ```text
//! [crc32 (u32)][seq (u64)][op (u8)][key_len (u32)][value_len (u32)][key][value]
//! ```
//!
//! All integers little-endian; `op` is 1 for put, 2 for delete; the CRC
//! covers everything after itself. `value` is empty for deletes.
//!
//! # Guarantees
//!
//! - **Durability:** a successful `flush()` means every record staged
//!   before the call has been fsynced.
//! - **Loud failure:** a failed fsync is recorded and surfaces as an
//!   error from `flush()`; it is never silently swallowed.
//! - **Corruption detection:** replay verifies each record's CRC and
//!   stops at the first mismatch or torn tail — that record and
//!   everything after it are discarded.
//!
//! # Rotation
//!
//! [`Wal::rotate`] renames the live log aside (for the memtable being
//! frozen) and starts a fresh one, so writes acknowledged after a
//! memtable rotation keep their own durable log until their own flush
//! completes. The flusher deletes the frozen log only after the SSTable
//! it produced is named by a durable manifest.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    mem,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::types::{EntryKind, HexKey};

/// Fixed bytes before the key: crc(4) + seq(8) + op(1) + key_len(4) + value_len(4).
const RECORD_HEADER_SIZE: usize = 21;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The syncer thread hit a write/fsync failure; records staged since
    /// the last successful sync may not be durable.
    #[error("WAL sync failed: {0}")]
    SyncFailed(String),

    /// The WAL was shut down while an operation was waiting on it.
    #[error("WAL is shut down")]
    ShutDown,
}

// ------------------------------------------------------------------------------------------------
// Record encoding
// ------------------------------------------------------------------------------------------------

/// Encodes one record onto the end of `buf`.
fn encode_record(buf: &mut Vec<u8>, op: EntryKind, key: &[u8], value: &[u8], seq: u64) {
    let mut payload = Vec::with_capacity(RECORD_HEADER_SIZE - 4 + key.len() + value.len());
    payload.extend_from_slice(&seq.to_le_bytes());
    payload.push(op.code());
    payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
    payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
    payload.extend_from_slice(key);
    payload.extend_from_slice(value);

    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&payload);
}

// ------------------------------------------------------------------------------------------------
// Shared syncer state
// ------------------------------------------------------------------------------------------------

struct SyncState {
    /// Set when an append crossed the high-water mark or a flush was
    /// requested; cleared by the syncer before it drains.
    requested: bool,

    /// Set once at shutdown; the syncer drains one last time and exits.
    shutdown: bool,

    /// Highest generation any `flush()` call has asked for.
    sync_generation: u64,

    /// Highest generation known durable.
    synced_generation: u64,

    /// Sticky record of the last write/fsync failure.
    last_error: Option<String>,
}

struct WalShared {
    /// Lock order: `buffer` before `file` (the syncer drain and `rotate`
    /// both take them in that order).
    buffer: Mutex<Vec<u8>>,
    file: Mutex<File>,
    sync: Mutex<SyncState>,
    request_cv: Condvar,
    done_cv: Condvar,
    high_water: usize,
    interval: Duration,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// The write-ahead log for the active memtable.
///
/// Owned by the engine; the single writer thread is the only appender.
/// The syncer thread is spawned at open and joined on drop.
pub struct Wal {
    path: PathBuf,
    shared: Arc<WalShared>,
    syncer: Option<thread::JoinHandle<()>>,
}

impl Wal {
    /// Opens (or creates) the log file at `path` and starts the syncer
    /// thread.
    pub fn open(
        path: impl Into<PathBuf>,
        sync_interval_ms: u64,
        buffer_high_water: usize,
    ) -> Result<Self, WalError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), "opened WAL");

        let shared = Arc::new(WalShared {
            buffer: Mutex::new(Vec::new()),
            file: Mutex::new(file),
            sync: Mutex::new(SyncState {
                requested: false,
                shutdown: false,
                sync_generation: 0,
                synced_generation: 0,
                last_error: None,
            }),
            request_cv: Condvar::new(),
            done_cv: Condvar::new(),
            high_water: buffer_high_water,
            interval: Duration::from_millis(sync_interval_ms.max(1)),
        });

        let syncer_shared = Arc::clone(&shared);
        let syncer = thread::Builder::new()
            .name("loamdb-wal-sync".into())
            .spawn(move || syncer_loop(syncer_shared))
            .map_err(WalError::Io)?;

        Ok(Self {
            path,
            shared,
            syncer: Some(syncer),
        })
    }

    /// Stages one record. Returns once the record is in the buffer; it
    /// becomes durable at the next sync (timer, high-water mark, or an
    /// explicit [`Wal::flush`]).
    pub fn append(&self, op: EntryKind, key: &[u8], value: &[u8], seq: u64) {
        trace!(seq, op = op.code(), key = %HexKey(key), "staging WAL record");

        let over_high_water = {
            let mut buffer = lock_or_recover(&self.shared.buffer);
            encode_record(&mut buffer, op, key, value, seq);
            buffer.len() >= self.shared.high_water
        };

        if over_high_water {
            let mut sync = lock_or_recover(&self.shared.sync);
            sync.requested = true;
            self.shared.request_cv.notify_one();
        }
    }

    /// Blocks until every record staged before this call is durable.
    pub fn flush(&self) -> Result<(), WalError> {
        let target = {
            let mut sync = lock_or_recover(&self.shared.sync);
            sync.sync_generation += 1;
            sync.requested = true;
            self.shared.request_cv.notify_one();
            sync.sync_generation
        };

        let mut sync = lock_or_recover(&self.shared.sync);
        while sync.synced_generation < target && !sync.shutdown {
            sync = self
                .shared
                .done_cv
                .wait(sync)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        if let Some(msg) = &sync.last_error {
            return Err(WalError::SyncFailed(msg.clone()));
        }
        if sync.synced_generation < target {
            return Err(WalError::ShutDown);
        }
        Ok(())
    }

    /// True iff the log file does not exist or has zero size.
    pub fn empty(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true)
    }

    /// Path of the live log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the live log to `frozen_path` and starts a fresh one.
    ///
    /// Everything staged so far is flushed first, so the frozen file is a
    /// complete durable image of the memtable being rotated out. The
    /// caller deletes `frozen_path` once the corresponding SSTable is
    /// named by a durable manifest.
    pub fn rotate(&self, frozen_path: &Path) -> Result<(), WalError> {
        self.flush()?;

        // Hold both locks so the syncer cannot interleave with the swap.
        let _buffer = lock_or_recover(&self.shared.buffer);
        let mut file = lock_or_recover(&self.shared.file);
        debug_assert!(_buffer.is_empty(), "rotate with staged records");

        fs::rename(&self.path, frozen_path)?;
        *file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        info!(
            live = %self.path.display(),
            frozen = %frozen_path.display(),
            "rotated WAL"
        );
        Ok(())
    }

    /// Discards all staged and persisted records.
    pub fn clear(&self) -> Result<(), WalError> {
        let mut buffer = lock_or_recover(&self.shared.buffer);
        let file = lock_or_recover(&self.shared.file);
        buffer.clear();
        file.set_len(0)?;
        file.sync_all()?;
        info!(path = %self.path.display(), "cleared WAL");
        Ok(())
    }

    /// Signals the syncer to drain and exit, then joins it.
    fn shutdown(&mut self) {
        {
            let mut sync = lock_or_recover(&self.shared.sync);
            if sync.shutdown {
                return;
            }
            sync.shutdown = true;
            self.shared.request_cv.notify_all();
            self.shared.done_cv.notify_all();
        }
        if let Some(handle) = self.syncer.take() {
            if handle.join().is_err() {
                error!("WAL syncer thread panicked");
            }
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// Syncer thread
// ------------------------------------------------------------------------------------------------

fn syncer_loop(shared: Arc<WalShared>) {
    debug!("WAL syncer started");
    loop {
        let (target, stop) = {
            let mut sync = lock_or_recover(&shared.sync);
            if !sync.requested && !sync.shutdown {
                let (guard, _timeout) = shared
                    .request_cv
                    .wait_timeout(sync, shared.interval)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                sync = guard;
            }
            sync.requested = false;
            (sync.sync_generation, sync.shutdown)
        };

        do_sync(&shared, target);

        if stop {
            break;
        }
    }
    debug!("WAL syncer stopped");
}

fn do_sync(shared: &WalShared, target: u64) {
    let data = {
        let mut buffer = lock_or_recover(&shared.buffer);
        mem::take(&mut *buffer)
    };

    {
        // Nothing staged and no one waiting on a newer generation.
        let sync = lock_or_recover(&shared.sync);
        if data.is_empty() && sync.synced_generation >= target {
            return;
        }
    }

    let result = (|| -> io::Result<()> {
        let mut file = lock_or_recover(&shared.file);
        if !data.is_empty() {
            file.write_all(&data)?;
        }
        file.sync_all()
    })();

    let mut sync = lock_or_recover(&shared.sync);
    match result {
        Ok(()) => {
            trace!(bytes = data.len(), generation = target, "WAL sync complete");
        }
        Err(e) => {
            error!(error = %e, "WAL sync failed");
            sync.last_error = Some(e.to_string());
        }
    }
    // Advance even on failure so waiters wake and observe the error.
    sync.synced_generation = sync.synced_generation.max(target);
    shared.done_cv.notify_all();
}

// ------------------------------------------------------------------------------------------------
// Replay
// ------------------------------------------------------------------------------------------------

/// Replays all valid records of the log at `path` in order, calling
/// `apply(seq, op, key, value)` per record.
///
/// Stops at the first checksum mismatch or truncated record: that record
/// and everything after it are discarded as a torn tail. A missing file
/// replays zero records. Returns the number of records applied.
pub fn replay(
    path: &Path,
    mut apply: impl FnMut(u64, EntryKind, Vec<u8>, Vec<u8>),
) -> Result<u64, WalError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(WalError::Io(e)),
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut offset = 0usize;
    let mut applied = 0u64;

    while offset < data.len() {
        if data.len() - offset < RECORD_HEADER_SIZE {
            warn!(offset, "torn WAL tail: truncated record header");
            break;
        }

        let stored_crc = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        let seq = u64::from_le_bytes(data[offset + 4..offset + 12].try_into().unwrap());
        let op_code = data[offset + 12];
        let key_len =
            u32::from_le_bytes(data[offset + 13..offset + 17].try_into().unwrap()) as usize;
        let value_len =
            u32::from_le_bytes(data[offset + 17..offset + 21].try_into().unwrap()) as usize;

        let body_end = match (offset + RECORD_HEADER_SIZE)
            .checked_add(key_len)
            .and_then(|n| n.checked_add(value_len))
        {
            Some(end) if end <= data.len() => end,
            _ => {
                warn!(offset, "torn WAL tail: truncated record body");
                break;
            }
        };

        let mut hasher = Crc32::new();
        hasher.update(&data[offset + 4..body_end]);
        if hasher.finalize() != stored_crc {
            warn!(offset, seq, "WAL checksum mismatch; discarding tail");
            break;
        }

        let op = match EntryKind::from_code(op_code) {
            Some(op) => op,
            None => {
                warn!(offset, op_code, "unknown WAL op; discarding tail");
                break;
            }
        };

        let key_start = offset + RECORD_HEADER_SIZE;
        let key = data[key_start..key_start + key_len].to_vec();
        let value = data[key_start + key_len..body_end].to_vec();

        apply(seq, op, key, value);
        applied += 1;
        offset = body_end;
    }

    info!(path = %path.display(), records = applied, "WAL replay finished");
    Ok(applied)
}
