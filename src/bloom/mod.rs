//! Bloom Filter Module
//!
//! Per-SSTable probabilistic set membership. Each SSTable carries one
//! filter sized from its key count at a ~1% target false-positive rate;
//! reads probe the filter before touching the sparse index so that
//! lookups for absent keys skip the table entirely.
//!
//! ## Guarantees
//!
//! - **No false negatives:** every key that was `add`ed answers `true`
//!   from `contains`.
//! - **Tunable false positives:** unseen keys answer `true` with
//!   probability close to the configured rate.
//!
//! ## Sizing
//!
//! For `n` expected keys at false-positive rate `fp`:
//!
//! ```text
//! m = ceil(-n * ln(fp) / (ln 2)^2)        bits
//! k = max(1, round((m / n) * ln 2))       hash functions
//! ```
//!
//! ## Hashing
//!
//! Double hashing over two stable 64-bit xxh3 digests:
//!
//! ```text
//! h_i(key) = h1(key) + i * h2(key)   (mod m)
//! ```
//!
//! where `h1` is the unseeded digest and `h2` is the digest under a fixed
//! salt. Both are deterministic across runs and platforms, which the
//! on-disk format requires.
//!
//! # On-disk layout
//!
//! ```text
//! [m (u64 LE)][k (u64 LE)][num_bytes (u64 LE)][bit_vector]
//! ```
//!
//! with `num_bytes = ceil(m / 8)`. An empty filter serializes to a valid
//! header with zero data bytes.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Seed salting the second hash of the double-hashing scheme.
const H2_SEED: u64 = 0x5f3b_79d1_a2c4_8e67;

const HEADER_SIZE: usize = 24;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned when decoding a serialized filter.
#[derive(Debug, Error)]
pub enum BloomError {
    /// Fewer bytes than the fixed header requires.
    #[error("Bloom filter data too short: {0} bytes")]
    TooShort(usize),

    /// Header and payload disagree about the bit vector length.
    #[error("Bloom filter length mismatch: header says {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

// ------------------------------------------------------------------------------------------------
// BloomFilter
// ------------------------------------------------------------------------------------------------

/// A bloom filter over byte-string keys.
#[derive(Debug)]
pub struct BloomFilter {
    /// Packed bit vector, `ceil(m / 8)` bytes.
    bits: Vec<u8>,

    /// Number of bits (`m`).
    num_bits: u64,

    /// Number of hash probes per key (`k`).
    num_hashes: u64,
}

impl BloomFilter {
    /// Creates a filter sized for `n` expected keys at false-positive
    /// rate `fp`.
    ///
    /// `n == 0` produces a valid empty filter: nothing was added, so
    /// `contains` answers `false` for every key.
    pub fn new(n: usize, fp: f64) -> Self {
        debug_assert!(fp > 0.0 && fp < 1.0, "false-positive rate must be in (0, 1)");

        if n == 0 {
            return Self {
                bits: Vec::new(),
                num_bits: 0,
                num_hashes: 1,
            };
        }

        let ln2 = std::f64::consts::LN_2;
        let m = (-(n as f64) * fp.ln() / (ln2 * ln2)).ceil() as u64;
        let m = m.max(1);
        let k = ((m as f64 / n as f64) * ln2).round() as u64;
        let k = k.max(1);

        let num_bytes = m.div_ceil(8) as usize;

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Adds a key to the set.
    pub fn add(&mut self, key: &[u8]) {
        if self.num_bits == 0 {
            return;
        }

        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns `true` if the key may be in the set, `false` if it is
    /// definitely absent.
    pub fn contains(&self, key: &[u8]) -> bool {
        if self.num_bits == 0 {
            return false;
        }

        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            if self.bits[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Serializes the filter into the on-disk layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.bits.len());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&(self.bits.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.bits);
        buf
    }

    /// Decodes a filter from the on-disk layout.
    pub fn deserialize(data: &[u8]) -> Result<Self, BloomError> {
        if data.len() < HEADER_SIZE {
            return Err(BloomError::TooShort(data.len()));
        }

        let num_bits = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let num_hashes = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let num_bytes = u64::from_le_bytes(data[16..24].try_into().unwrap()) as usize;

        let payload = &data[HEADER_SIZE..];
        if payload.len() != num_bytes || num_bytes != num_bits.div_ceil(8) as usize {
            return Err(BloomError::LengthMismatch {
                expected: num_bytes,
                actual: payload.len(),
            });
        }

        Ok(Self {
            bits: payload.to_vec(),
            num_bits,
            num_hashes: num_hashes.max(1),
        })
    }

    /// Number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash probes per key.
    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        (xxh3_64(key), xxh3_64_with_seed(key, H2_SEED))
    }
}
