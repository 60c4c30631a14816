#[cfg(test)]
mod tests {
    use crate::sstable::{flush, SSTable};
    use crate::types::Entry;
    use std::collections::BTreeMap;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn build_one(dir: &std::path::Path) -> std::path::PathBuf {
        let mut snapshot = BTreeMap::new();
        for i in 0..50 {
            snapshot.insert(
                format!("key_{:03}", i).into_bytes(),
                Entry::put(b"value".to_vec(), i as u64 + 1),
            );
        }
        let (table, _) = flush(&snapshot, dir, 1).unwrap();
        table.path().to_path_buf()
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let tmp = TempDir::new().unwrap();
        let path = build_one(tmp.path());

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(4).unwrap();

        assert!(SSTable::open(&path, 1).is_err());
    }

    #[test]
    fn test_open_rejects_bad_trailer_offset() {
        let tmp = TempDir::new().unwrap();
        let path = build_one(tmp.path());

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.seek(SeekFrom::Start(len - 8)).unwrap();
        file.write_all(&u64::MAX.to_le_bytes()).unwrap();
        file.sync_all().unwrap();

        assert!(SSTable::open(&path, 1).is_err());
    }

    #[test]
    fn test_open_rejects_garbage_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sstable_9.bin");
        std::fs::write(&path, [0xFFu8; 64]).unwrap();

        assert!(SSTable::open(&path, 9).is_err());
    }

    #[test]
    fn test_open_rejects_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(SSTable::open(tmp.path().join("sstable_404.bin"), 404).is_err());
    }
}
