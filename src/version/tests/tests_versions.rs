#[cfg(test)]
mod tests {
    use crate::sstable::{flush, SSTableMeta};
    use crate::types::Entry;
    use crate::version::{TableVersion, VersionSet};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build_table(
        dir: &std::path::Path,
        id: u64,
        level: u32,
        first: &str,
        last: &str,
    ) -> (Arc<crate::sstable::SSTable>, SSTableMeta) {
        let mut snapshot = BTreeMap::new();
        snapshot.insert(first.as_bytes().to_vec(), Entry::put(b"v".to_vec(), id * 10));
        snapshot.insert(last.as_bytes().to_vec(), Entry::put(b"v".to_vec(), id * 10 + 1));
        let (table, mut meta) = flush(&snapshot, dir, id).unwrap();
        meta.level = level;
        (Arc::new(table), meta)
    }

    #[test]
    fn test_edit_does_not_disturb_current() {
        let tmp = TempDir::new().unwrap();
        let versions = VersionSet::new(TableVersion::empty());

        let (handle, meta) = build_table(tmp.path(), 1, 0, "a", "m");
        let mut edit = versions.edit();
        edit.add_sstable(meta, handle);

        // Nothing published yet.
        assert_eq!(versions.current().table_count(), 0);

        versions.install(edit);
        assert_eq!(versions.current().table_count(), 1);
        assert_eq!(versions.current().version_number, 1);
    }

    #[test]
    fn test_readers_keep_old_snapshot_across_install() {
        let tmp = TempDir::new().unwrap();
        let versions = VersionSet::new(TableVersion::empty());

        let (handle, meta) = build_table(tmp.path(), 1, 0, "a", "m");
        let mut edit = versions.edit();
        edit.add_sstable(meta, handle);
        versions.install(edit);

        let snapshot = versions.current();

        let mut edit = versions.edit();
        edit.remove_sstables_by_ids(&[1]);
        versions.install(edit);

        // The held snapshot still sees table 1 and a valid handle.
        assert_eq!(snapshot.table_count(), 1);
        let handle = snapshot.find_sstable_by_id(1).unwrap();
        assert!(handle.get(b"a").unwrap().is_some());
        // The new current does not.
        assert_eq!(versions.current().table_count(), 0);
    }

    #[test]
    fn test_l0_ordered_by_id_newest_last() {
        let tmp = TempDir::new().unwrap();
        let mut version = TableVersion::empty();

        for id in [3u64, 1, 2] {
            let (handle, meta) = build_table(tmp.path(), id, 0, "a", "z");
            version.add_sstable(meta, handle);
        }

        let ids: Vec<u64> = version.level_tables(0).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_deeper_levels_ordered_by_min_key() {
        let tmp = TempDir::new().unwrap();
        let mut version = TableVersion::empty();

        let (h1, m1) = build_table(tmp.path(), 1, 1, "m", "p");
        let (h2, m2) = build_table(tmp.path(), 2, 1, "a", "c");
        let (h3, m3) = build_table(tmp.path(), 3, 1, "x", "z");
        version.add_sstable(m1, h1);
        version.add_sstable(m2, h2);
        version.add_sstable(m3, h3);

        let mins: Vec<Vec<u8>> = version
            .level_tables(1)
            .iter()
            .map(|m| m.min_key.clone())
            .collect();
        assert_eq!(mins, vec![b"a".to_vec(), b"m".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn test_remove_drops_meta_and_handle() {
        let tmp = TempDir::new().unwrap();
        let mut version = TableVersion::empty();
        let (handle, meta) = build_table(tmp.path(), 5, 0, "a", "b");
        version.add_sstable(meta, handle);

        version.remove_sstables_by_ids(&[5]);
        assert_eq!(version.table_count(), 0);
        assert!(version.find_sstable_by_id(5).is_none());
    }

    #[test]
    fn test_level_size_bytes_sums_tables() {
        let tmp = TempDir::new().unwrap();
        let mut version = TableVersion::empty();
        let (h1, m1) = build_table(tmp.path(), 1, 1, "a", "c");
        let (h2, m2) = build_table(tmp.path(), 2, 1, "d", "f");
        let expected = m1.size_bytes + m2.size_bytes;
        version.add_sstable(m1, h1);
        version.add_sstable(m2, h2);

        assert_eq!(version.level_size_bytes(1), expected);
        assert_eq!(version.level_size_bytes(7), 0);
    }
}
