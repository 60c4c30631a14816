use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::Engine;

/// Initialize tracing controlled by `RUST_LOG`. Safe to call repeatedly —
/// only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config sized so tests never trigger a flush on their own.
pub fn memtable_only_config(dir: &Path) -> Config {
    init_tracing();
    Config {
        data_dir: dir.to_path_buf(),
        memtable_threshold_bytes: 64 * 1024 * 1024,
        wal_sync_interval_ms: 1,
        ..Config::default()
    }
}

/// Config with a small split bound so compaction produces several
/// outputs.
pub fn small_table_config(dir: &Path) -> Config {
    init_tracing();
    Config {
        data_dir: dir.to_path_buf(),
        memtable_threshold_bytes: 64 * 1024 * 1024,
        sstable_size_bytes: 4096,
        wal_sync_interval_ms: 1,
        ..Config::default()
    }
}

pub fn open(config: Config) -> Engine {
    Engine::open(config).expect("failed to open engine")
}
