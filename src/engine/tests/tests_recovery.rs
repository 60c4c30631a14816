#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::{init_tracing, memtable_only_config, open};
    use crate::engine::{FROZEN_WAL_FILE, WAL_FILE};
    use crate::types::EntryKind;
    use crate::wal::Wal;
    use tempfile::TempDir;

    #[test]
    fn test_unflushed_writes_survive_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(memtable_only_config(tmp.path()));
            engine.put(b"k1".to_vec(), b"v1".to_vec());
            engine.put(b"k2".to_vec(), b"v2".to_vec());
            engine.delete(b"k1".to_vec());
            // Dropped without flush: only the WAL persists this state.
        }

        let engine = open(memtable_only_config(tmp.path()));
        assert!(engine.get(b"k1").unwrap().is_none());
        assert_eq!(engine.get(b"k2").unwrap().unwrap().value, b"v2");
    }

    #[test]
    fn test_flushed_and_unflushed_writes_both_survive() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(memtable_only_config(tmp.path()));
            engine.put(b"flushed".to_vec(), b"v1".to_vec());
            engine.flush().unwrap();
            engine.put(b"in-wal".to_vec(), b"v2".to_vec());
        }

        let engine = open(memtable_only_config(tmp.path()));
        assert_eq!(engine.get(b"flushed").unwrap().unwrap().value, b"v1");
        assert_eq!(engine.get(b"in-wal").unwrap().unwrap().value, b"v2");
    }

    #[test]
    fn test_seq_counter_advances_past_recovered_writes() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(memtable_only_config(tmp.path()));
            for i in 0..10 {
                engine.put(format!("k{}", i).into_bytes(), b"v".to_vec());
            }
        }

        let engine = open(memtable_only_config(tmp.path()));
        let old_seq = engine.get(b"k9").unwrap().unwrap().seq;
        engine.put(b"k9".to_vec(), b"newer".to_vec());
        let new_seq = engine.get(b"k9").unwrap().unwrap().seq;
        assert!(new_seq > old_seq, "post-recovery writes must win");
    }

    #[test]
    fn test_torn_wal_tail_is_discarded() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(memtable_only_config(tmp.path()));
            engine.put(b"good".to_vec(), b"v".to_vec());
        }

        // Append a torn fragment to the live log.
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(tmp.path().join(WAL_FILE))
            .unwrap();
        file.write_all(&[0xFF; 30]).unwrap();
        file.sync_all().unwrap();

        let engine = open(memtable_only_config(tmp.path()));
        assert_eq!(engine.get(b"good").unwrap().unwrap().value, b"v");
    }

    /// A frozen WAL left by a crash mid-flush is recovered as an
    /// immutable memtable and flushed on the next open.
    #[test]
    fn test_interrupted_flush_is_recovered_from_frozen_wal() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        {
            let wal = Wal::open(tmp.path().join(FROZEN_WAL_FILE), 1, 1024).unwrap();
            wal.append(EntryKind::Put, b"frozen_key", b"frozen_value", 5);
            wal.flush().unwrap();
        }

        let engine = open(memtable_only_config(tmp.path()));
        assert_eq!(
            engine.get(b"frozen_key").unwrap().unwrap().value,
            b"frozen_value"
        );

        // The redone flush eventually lands in L0 and removes the log.
        engine.flush().unwrap();
        assert!(!tmp.path().join(FROZEN_WAL_FILE).exists());
        assert_eq!(engine.stats().levels[0].0, 1);

        // Seq counter advanced past the recovered record.
        engine.put(b"frozen_key".to_vec(), b"newer".to_vec());
        let entry = engine.get(b"frozen_key").unwrap().unwrap();
        assert!(entry.seq > 5);
        assert_eq!(entry.value, b"newer");
    }

    #[test]
    fn test_restart_preserves_table_ids() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(memtable_only_config(tmp.path()));
            engine.put(b"a".to_vec(), b"1".to_vec());
            engine.flush().unwrap();
        }
        {
            let engine = open(memtable_only_config(tmp.path()));
            engine.put(b"b".to_vec(), b"2".to_vec());
            engine.flush().unwrap();
        }

        let dir = tmp.path().join(crate::engine::SSTABLE_DIR);
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["sstable_1.bin", "sstable_2.bin"]);
    }

    #[test]
    fn test_orphan_sstables_are_swept_at_open() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(memtable_only_config(tmp.path()));
            engine.put(b"a".to_vec(), b"1".to_vec());
            engine.flush().unwrap();
        }

        // A table file the manifest never heard of.
        let orphan = tmp
            .path()
            .join(crate::engine::SSTABLE_DIR)
            .join("sstable_999.bin");
        std::fs::write(&orphan, b"garbage").unwrap();

        let _engine = open(memtable_only_config(tmp.path()));
        assert!(!orphan.exists(), "orphan file must be swept");
    }
}
