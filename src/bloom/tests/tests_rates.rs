#[cfg(test)]
mod tests {
    use crate::bloom::BloomFilter;

    /// 10k inserted keys must all be present; 10k fresh keys must come
    /// back positive at no more than ~3x the 1% target rate.
    #[test]
    fn test_false_positive_rate_near_target() {
        let mut filter = BloomFilter::new(10_000, 0.01);

        for i in 0..10_000 {
            filter.add(format!("member_{:05}", i).as_bytes());
        }

        for i in 0..10_000 {
            assert!(
                filter.contains(format!("member_{:05}", i).as_bytes()),
                "false negative for member_{:05}",
                i
            );
        }

        let mut false_positives = 0usize;
        for i in 0..10_000 {
            if filter.contains(format!("stranger_{:05}", i).as_bytes()) {
                false_positives += 1;
            }
        }

        // Accept up to 3x the configured 1% rate.
        assert!(
            false_positives <= 300,
            "false positive rate too high: {} / 10000",
            false_positives
        );
    }

    #[test]
    fn test_tighter_rate_uses_more_bits() {
        let loose = BloomFilter::new(1000, 0.05);
        let tight = BloomFilter::new(1000, 0.001);
        assert!(tight.num_bits() > loose.num_bits());
        assert!(tight.num_hashes() >= loose.num_hashes());
    }
}
