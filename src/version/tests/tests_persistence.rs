#[cfg(test)]
mod tests {
    use crate::sstable::SSTableMeta;
    use crate::version::{load_manifest, persist_manifest, TableVersion, LEVELS_FILE};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn version_with(metas: Vec<SSTableMeta>, flush_counter: u64) -> TableVersion {
        let mut levels: Vec<Vec<SSTableMeta>> = Vec::new();
        for meta in metas {
            while levels.len() <= meta.level as usize {
                levels.push(Vec::new());
            }
            levels[meta.level as usize].push(meta);
        }
        TableVersion {
            levels,
            sstables: HashMap::new(),
            version_number: 1,
            flush_counter,
        }
    }

    fn meta(id: u64, level: u32, min_key: &[u8], max_key: &[u8]) -> SSTableMeta {
        SSTableMeta {
            id,
            level,
            min_key: min_key.to_vec(),
            max_key: max_key.to_vec(),
            max_seq: id * 100,
            size_bytes: id * 4096,
        }
    }

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let version = version_with(
            vec![meta(1, 0, b"a", b"m"), meta(2, 0, b"c", b"z"), meta(3, 1, b"a", b"k")],
            3,
        );

        persist_manifest(tmp.path(), &version, 42).unwrap();
        let state = load_manifest(tmp.path()).unwrap().unwrap();

        assert_eq!(state.flush_counter, 3);
        assert_eq!(state.next_seq, 42);
        assert_eq!(state.tables.len(), 3);
        assert_eq!(state.tables[0], meta(1, 0, b"a", b"m"));
        assert_eq!(state.tables[2], meta(3, 1, b"a", b"k"));
    }

    #[test]
    fn test_missing_manifest_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_manifest(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_binary_and_whitespace_keys_survive() {
        let tmp = TempDir::new().unwrap();
        let awkward_min = vec![0x00, 0x20, 0x0a, 0xff];
        let awkward_max = b"key with spaces\tand tabs".to_vec();
        let version = version_with(vec![meta(1, 0, &awkward_min, &awkward_max)], 1);

        persist_manifest(tmp.path(), &version, 5).unwrap();
        let state = load_manifest(tmp.path()).unwrap().unwrap();

        assert_eq!(state.tables[0].min_key, awkward_min);
        assert_eq!(state.tables[0].max_key, awkward_max);
    }

    #[test]
    fn test_empty_keys_survive() {
        let tmp = TempDir::new().unwrap();
        let version = version_with(vec![meta(1, 0, b"", b"")], 1);

        persist_manifest(tmp.path(), &version, 1).unwrap();
        let state = load_manifest(tmp.path()).unwrap().unwrap();

        assert!(state.tables[0].min_key.is_empty());
        assert!(state.tables[0].max_key.is_empty());
    }

    #[test]
    fn test_rewrite_replaces_previous_manifest() {
        let tmp = TempDir::new().unwrap();
        persist_manifest(tmp.path(), &version_with(vec![meta(1, 0, b"a", b"b")], 1), 1).unwrap();
        persist_manifest(tmp.path(), &version_with(vec![meta(2, 1, b"c", b"d")], 2), 9).unwrap();

        let state = load_manifest(tmp.path()).unwrap().unwrap();
        assert_eq!(state.flush_counter, 2);
        assert_eq!(state.next_seq, 9);
        assert_eq!(state.tables.len(), 1);
        assert_eq!(state.tables[0].id, 2);
    }

    #[test]
    fn test_corrupt_levels_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        persist_manifest(tmp.path(), &version_with(vec![], 1), 1).unwrap();
        std::fs::write(tmp.path().join(LEVELS_FILE), "1 0 nonsense\n").unwrap();

        assert!(load_manifest(tmp.path()).is_err());
    }

    #[test]
    fn test_no_tmp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        persist_manifest(tmp.path(), &version_with(vec![meta(1, 0, b"a", b"b")], 1), 1).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
