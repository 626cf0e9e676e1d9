//! Session-wide grammar shared by all grammar sequences.

use super::compressor::{GrammarCompressor, GrammarStats};
use super::format::encode_rules;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracestore_core::Result;

/// One grammar per session, guarded by a single mutex.
///
/// The mutex is held only for in-memory appends; no I/O happens under it.
#[derive(Debug, Default)]
pub struct SharedGrammar {
    compressor: Mutex<GrammarCompressor>,
    // Running length of the shared output; advanced inside the lock
    len: AtomicU64,
}

impl SharedGrammar {
    /// Create an empty shared grammar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of values as one contiguous range.
    ///
    /// Returns the offset of the first value. Concurrent callers receive
    /// disjoint ranges that together cover `[0, len)` without gaps.
    pub fn append_all(&self, values: &[i64]) -> u64 {
        let mut compressor = self.compressor.lock();
        let offset = self.len.fetch_add(values.len() as u64, Ordering::SeqCst);
        for &value in values {
            compressor.append(value);
        }
        debug_assert_eq!(compressor.len(), offset + values.len() as u64);
        offset
    }

    /// Number of values appended so far.
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::SeqCst)
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size figures.
    pub fn stats(&self) -> GrammarStats {
        self.compressor.lock().stats()
    }

    /// Serialize the rule table, gzip-wrapped at `level`.
    pub fn encode(&self, level: u32) -> Result<Vec<u8>> {
        let (rules, total) = {
            let compressor = self.compressor.lock();
            (compressor.rules(), compressor.len())
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
        encode_rules(&mut encoder, &rules, total)?;
        Ok(encoder.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Expansion, LoadedGrammar};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_ranges_are_contiguous() {
        let grammar = SharedGrammar::new();
        assert_eq!(grammar.append_all(&[1, 2, 3]), 0);
        assert_eq!(grammar.append_all(&[]), 3);
        assert_eq!(grammar.append_all(&[4]), 3);
        assert_eq!(grammar.len(), 4);
    }

    #[test]
    fn test_concurrent_ranges_disjoint() {
        let grammar = Arc::new(SharedGrammar::new());
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|t| {
                let grammar = Arc::clone(&grammar);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let values: Vec<i64> = (0..50).map(|i| (t * 100 + i % 7) as i64).collect();
                    barrier.wait();
                    let offset = grammar.append_all(&values);
                    (offset, values)
                })
            })
            .collect();
        let mut ranges: Vec<(u64, Vec<i64>)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ranges.sort_by_key(|(offset, _)| *offset);

        let mut expected_offset = 0;
        for (offset, values) in &ranges {
            assert_eq!(*offset, expected_offset);
            expected_offset += values.len() as u64;
        }
        assert_eq!(grammar.len(), expected_offset);

        let loaded = Arc::new(LoadedGrammar::decode(&grammar.encode(6).unwrap()).unwrap());
        for (offset, values) in ranges {
            let decoded: Vec<i64> =
                Expansion::forward(Arc::clone(&loaded), offset, values.len() as u64)
                    .unwrap()
                    .collect();
            assert_eq!(decoded, values);
        }
    }
}
