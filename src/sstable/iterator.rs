//! Streaming iterator over an SSTable's data region.
//!
//! Yields `(key, Entry)` pairs in key order without materializing the
//! whole table, which is what the compaction merge wants: one record per
//! input table is resident at a time. Decode failures are yielded once as
//! an error, after which the iterator is exhausted — the compaction that
//! consumes it aborts rather than silently dropping the tail.

use crate::types::Entry;

use super::{read_record, SSTable, SstableError};

/// Forward iterator over all records of one table.
pub struct SstIterator<'a> {
    table: &'a SSTable,
    pos: usize,
    failed: bool,
}

impl<'a> SstIterator<'a> {
    pub(crate) fn new(table: &'a SSTable) -> Self {
        Self {
            table,
            pos: 0,
            failed: false,
        }
    }
}

impl Iterator for SstIterator<'_> {
    type Item = Result<(Vec<u8>, Entry), SstableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.table.data_end() as usize {
            return None;
        }

        match read_record(self.table.data(), self.pos) {
            Ok((key, value, seq, kind, next)) => {
                if next > self.table.data_end() as usize {
                    self.failed = true;
                    return Some(Err(SstableError::Corrupt(format!(
                        "record at {} runs past data region end {}",
                        self.pos,
                        self.table.data_end()
                    ))));
                }
                self.pos = next;
                Some(Ok((
                    key.to_vec(),
                    Entry {
                        value: value.to_vec(),
                        seq,
                        kind,
                    },
                )))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
