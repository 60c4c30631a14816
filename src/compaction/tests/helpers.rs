use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::sstable::flush;
use crate::types::Entry;
use crate::version::TableVersion;

/// Builds a real SSTable from `(key, entry)` pairs and registers it in
/// the version at `level`.
pub fn add_table(
    version: &mut TableVersion,
    dir: &Path,
    id: u64,
    level: u32,
    entries: Vec<(&str, Entry)>,
) {
    let snapshot: BTreeMap<Vec<u8>, Entry> = entries
        .into_iter()
        .map(|(k, e)| (k.as_bytes().to_vec(), e))
        .collect();
    let (table, mut meta) = flush(&snapshot, dir, id).unwrap();
    meta.level = level;
    version.add_sstable(meta, Arc::new(table));
}

/// Config with a tiny output-split bound so splitting is observable.
pub fn small_output_config() -> Config {
    Config {
        sstable_size_bytes: 256,
        ..Config::default()
    }
}
