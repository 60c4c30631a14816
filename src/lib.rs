//! # LoamDB
//!
//! An embeddable, durable, single-node key-value storage engine built on
//! a **Log-Structured Merge Tree (LSM-tree)**: fast sequential writes,
//! crash safety through a write-ahead log, and leveled background
//! compaction of immutable on-disk runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                             │
//! │                                                            │
//! │  put/delete ──► write queue ──► writer thread              │
//! │                                   │  WAL append + fsync    │
//! │                                   ▼                        │
//! │  ┌───────────┐   rotate   ┌──────────────┐   flush         │
//! │  │  active   │ ─────────► │  immutable   │ ───────► L0     │
//! │  │  memtable │            │  memtable    │                 │
//! │  └───────────┘            └──────────────┘                 │
//! │                                                            │
//! │  get ──► cache ──► memtables ──► SSTables (L0 ► L1 ► …)    │
//! │                                                            │
//! │  compactor: Ln ──merge──► Ln+1   (version set + manifest)  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Orchestrator — open, put/get/delete, flush, compaction control |
//! | [`memtable`] | In-memory sorted write buffer |
//! | [`wal`] | Checksummed write-ahead log with group commit |
//! | [`sstable`] | Immutable sorted runs: data + sparse index + bloom filter |
//! | [`version`] | Atomically swapped snapshots of the live table set |
//! | [`compaction`] | Leveled merge policy and execution |
//! | [`bloom`] | Per-table membership filter |
//! | [`cache`] | Mutex-guarded LRU read cache |
//! | [`queue`] | Bounded write queue feeding the single writer |
//! | [`command`] | REPL command parser (collaborator) |
//! | [`server`] | Line-protocol TCP server (collaborator) |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loamdb::{Config, Engine};
//!
//! let engine = Engine::open(Config::new("/tmp/loamdb")).unwrap();
//!
//! assert!(engine.put(b"hello".to_vec(), b"world".to_vec()));
//! let entry = engine.get(b"hello").unwrap().unwrap();
//! assert_eq!(entry.value, b"world");
//!
//! assert!(engine.delete(b"hello".to_vec()));
//! assert!(engine.get(b"hello").unwrap().is_none());
//!
//! engine.flush().unwrap();
//! ```
//!
//! ## Guarantees
//!
//! - **Durability:** a successful `put`/`delete` means the WAL record is
//!   fsynced; restart + recovery observes the write.
//! - **Ordering:** sequence numbers are assigned in queue arrival order
//!   and totally order all operations.
//! - **Snapshot reads:** a read uses one consistent version of the
//!   SSTable set even while flushes and compactions install new ones.
//! - **Non-blocking readers:** readers never wait on the writer, the
//!   flusher, or the compactor.

pub mod bloom;
pub mod cache;
pub mod command;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod memtable;
pub mod queue;
pub mod server;
pub mod sstable;
pub mod types;
pub mod version;
pub mod wal;

pub use config::Config;
pub use engine::{Engine, EngineError, EngineStats};
pub use queue::WriteHandle;
pub use types::{Entry, EntryKind};
