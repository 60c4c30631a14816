//! Engine configuration.
//!
//! All thresholds have documented defaults; `Config::new(dir)` is enough
//! for most embedders. Passed to [`Engine::open`](crate::engine::Engine::open).

use std::path::PathBuf;

/// Configuration for an [`Engine`](crate::engine::Engine) instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all on-disk state (WAL, manifest, SSTables).
    pub data_dir: PathBuf,

    /// Capacity of the read cache, in entries.
    pub cache_size: usize,

    /// Max active memtable size (bytes) before it is rotated out and
    /// flushed to an L0 SSTable.
    pub memtable_threshold_bytes: usize,

    /// Number of L0 SSTables that triggers an L0 -> L1 compaction.
    pub l0_trigger: usize,

    /// Per-level size budgets, starting at L1. Levels beyond the last
    /// configured budget extend the ladder by x10 per level.
    pub level_budgets: Vec<u64>,

    /// Size bound at which compaction splits its output into a new
    /// SSTable.
    pub sstable_size_bytes: u64,

    /// Interval of the WAL group-commit timer, in milliseconds.
    pub wal_sync_interval_ms: u64,

    /// High-water mark of the WAL staging buffer; crossing it wakes the
    /// syncer early.
    pub wal_buffer_bytes: usize,

    /// Capacity of the write queue. Pushes block once this many requests
    /// are in flight.
    pub write_queue_depth: usize,
}

impl Config {
    /// Default configuration rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Size budget for level `level` (>= 1), extending the configured
    /// ladder by x10 beyond its last entry.
    pub fn level_budget(&self, level: u32) -> u64 {
        debug_assert!(level >= 1, "L0 is count-triggered, not size-triggered");
        let idx = (level - 1) as usize;
        if idx < self.level_budgets.len() {
            return self.level_budgets[idx];
        }
        let last = self
            .level_budgets
            .last()
            .copied()
            .unwrap_or(10 * 1024 * 1024);
        let extra = (idx - self.level_budgets.len() + 1) as u32;
        last.saturating_mul(10u64.saturating_pow(extra))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("loamdb-data"),
            cache_size: 1000,
            memtable_threshold_bytes: 8 * 1024 * 1024,
            l0_trigger: 4,
            level_budgets: vec![
                10 * 1024 * 1024,
                100 * 1024 * 1024,
                1024 * 1024 * 1024,
            ],
            sstable_size_bytes: 8 * 1024 * 1024,
            wal_sync_interval_ms: 10,
            wal_buffer_bytes: 256 * 1024,
            write_queue_depth: 10_000,
        }
    }
}
