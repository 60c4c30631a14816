#[cfg(test)]
mod tests {
    use crate::compaction::tests::helpers::add_table;
    use crate::compaction::{needs_compaction, pick_compaction};
    use crate::config::Config;
    use crate::types::Entry;
    use crate::version::TableVersion;
    use tempfile::TempDir;

    #[test]
    fn test_no_compaction_when_quiet() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let mut version = TableVersion::empty();
        add_table(&mut version, tmp.path(), 1, 0, vec![("a", Entry::put(b"v".to_vec(), 1))]);

        assert!(!needs_compaction(&version, &config));
    }

    #[test]
    fn test_l0_trigger_takes_all_of_l0() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let mut version = TableVersion::empty();
        for id in 1..=4 {
            add_table(
                &mut version,
                tmp.path(),
                id,
                0,
                vec![("a", Entry::put(b"v".to_vec(), id * 10))],
            );
        }

        let job = pick_compaction(&version, &config).unwrap();
        assert_eq!(job.source_level, 0);
        assert_eq!(job.target_level, 1);
        assert_eq!(job.input_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_l0_job_includes_overlapping_l1_only() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let mut version = TableVersion::empty();

        // L0 union range is [b, m].
        for id in 1..=4u64 {
            add_table(
                &mut version,
                tmp.path(),
                id,
                0,
                vec![
                    ("b", Entry::put(b"v".to_vec(), id * 10)),
                    ("m", Entry::put(b"v".to_vec(), id * 10 + 1)),
                ],
            );
        }
        // Overlapping L1 table.
        add_table(
            &mut version,
            tmp.path(),
            5,
            1,
            vec![("a", Entry::put(b"v".to_vec(), 1)), ("c", Entry::put(b"v".to_vec(), 2))],
        );
        // Disjoint L1 table beyond the union range.
        add_table(
            &mut version,
            tmp.path(),
            6,
            1,
            vec![("x", Entry::put(b"v".to_vec(), 3)), ("z", Entry::put(b"v".to_vec(), 4))],
        );

        let job = pick_compaction(&version, &config).unwrap();
        assert!(job.input_ids.contains(&5), "overlapping L1 table selected");
        assert!(!job.input_ids.contains(&6), "disjoint L1 table left alone");
    }

    #[test]
    fn test_level_over_budget_picks_first_table() {
        let tmp = TempDir::new().unwrap();
        // A budget small enough that one real table exceeds it.
        let config = Config {
            level_budgets: vec![1],
            ..Config::default()
        };
        let mut version = TableVersion::empty();
        add_table(
            &mut version,
            tmp.path(),
            1,
            1,
            vec![("d", Entry::put(b"v".to_vec(), 1)), ("f", Entry::put(b"v".to_vec(), 2))],
        );
        add_table(
            &mut version,
            tmp.path(),
            2,
            1,
            vec![("a", Entry::put(b"v".to_vec(), 3)), ("b", Entry::put(b"v".to_vec(), 4))],
        );
        // Overlaps table 2's [a, b] range.
        add_table(
            &mut version,
            tmp.path(),
            3,
            2,
            vec![("a", Entry::put(b"v".to_vec(), 5))],
        );
        // Does not overlap.
        add_table(
            &mut version,
            tmp.path(),
            4,
            2,
            vec![("q", Entry::put(b"v".to_vec(), 6))],
        );

        let job = pick_compaction(&version, &config).unwrap();
        assert_eq!(job.source_level, 1);
        assert_eq!(job.target_level, 2);
        // First L1 table in min_key order is id 2 ([a, b]).
        assert_eq!(job.input_ids[0], 2);
        assert!(job.input_ids.contains(&3));
        assert!(!job.input_ids.contains(&4));
    }

    #[test]
    fn test_within_budget_is_quiet() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default(); // L1 budget 10 MiB
        let mut version = TableVersion::empty();
        add_table(&mut version, tmp.path(), 1, 1, vec![("a", Entry::put(b"v".to_vec(), 1))]);

        assert!(pick_compaction(&version, &config).is_none());
    }
}
