//! End-to-end codec tests: values go through a real store file and come
//! back through `SequenceReader`.

use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use tempfile::tempdir;
use tracestore_codec::{
    CodecFactory, LoadedGrammar, SequenceLocation, SequenceReader, DEFAULT_GZIP_LEVEL,
};
use tracestore_core::{FormatTag, SequenceKind};
use tracestore_storage::{StoreConfig, StreamStore, StreamStoreReader};

// ============================================================================
// Helper Functions
// ============================================================================

/// Trace `values` through a fresh factory and read them back both ways.
fn roundtrip(format: FormatTag, kind: SequenceKind, values: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("codec.bin");
    let store = StreamStore::create(&path, StoreConfig::for_testing()).unwrap();
    let factory = CodecFactory::new(format, &store, DEFAULT_GZIP_LEVEL).unwrap();

    let mut seq = factory.create(kind).unwrap();
    for &v in values {
        seq.trace(v).unwrap();
    }
    seq.finish().unwrap();
    let location = seq.location().unwrap();

    let grammar_bytes = factory.grammar().map(|g| g.encode(DEFAULT_GZIP_LEVEL).unwrap());
    store.close().unwrap();

    let reader = StreamStoreReader::open(&path).unwrap();
    let grammar = grammar_bytes.map(|b| Arc::new(LoadedGrammar::decode(&b).unwrap()));
    let seq_reader =
        SequenceReader::open(format, kind, location, &reader, grammar.as_ref()).unwrap();
    assert_eq!(seq_reader.len(), values.len() as u64);

    let forward = seq_reader.to_vec().unwrap();
    let backward = seq_reader
        .values_backward()
        .unwrap()
        .collect::<tracestore_core::Result<Vec<i64>>>()
        .unwrap();
    (forward, backward)
}

fn reversed(values: &[i64]) -> Vec<i64> {
    values.iter().rev().copied().collect()
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[test]
fn test_uncompressed_integer_scenario() {
    let values = [10, 12, 12, 12, 9];
    let (forward, backward) = roundtrip(FormatTag::Uncompressed, SequenceKind::Integer, &values);
    assert_eq!(forward, values);
    assert_eq!(backward, reversed(&values));
}

#[test]
fn test_every_codec_roundtrips() {
    let values: Vec<i64> = (0..1500).map(|i| (i % 37) * 3 - 50).collect();
    for format in [FormatTag::Uncompressed, FormatTag::Gzip, FormatTag::Sequitur] {
        for kind in [SequenceKind::Integer, SequenceKind::Long, SequenceKind::Object] {
            let (forward, backward) = roundtrip(format, kind, &values);
            assert_eq!(forward, values, "{:?}/{:?}", format, kind);
            assert_eq!(backward, reversed(&values), "{:?}/{:?}", format, kind);
        }
    }
}

#[test]
fn test_empty_sequences() {
    for format in [FormatTag::Uncompressed, FormatTag::Gzip, FormatTag::Sequitur] {
        let (forward, backward) = roundtrip(format, SequenceKind::Long, &[]);
        assert!(forward.is_empty());
        assert!(backward.is_empty());
    }
}

#[test]
fn test_grammar_minimality() {
    let dir = tempdir().unwrap();
    let store = StreamStore::create(dir.path().join("g.bin"), StoreConfig::for_testing()).unwrap();
    let factory = CodecFactory::new(FormatTag::Sequitur, &store, DEFAULT_GZIP_LEVEL).unwrap();
    let grammar = factory.grammar().unwrap();

    let values = [5i64, 5, 5, 5, 5, 1, 2, 1, 2, 1, 2];
    grammar.append_all(&values);
    let stats = grammar.stats();
    assert!(stats.symbols < values.len());

    let loaded = Arc::new(LoadedGrammar::decode(&grammar.encode(9).unwrap()).unwrap());
    let decoded: Vec<i64> =
        tracestore_codec::grammar::Expansion::forward(loaded, 0, values.len() as u64)
            .unwrap()
            .collect();
    assert_eq!(decoded, values);
}

#[test]
fn test_concurrent_grammar_sequences_get_disjoint_ranges() {
    let dir = tempdir().unwrap();
    let store = StreamStore::create(dir.path().join("g.bin"), StoreConfig::for_testing()).unwrap();
    let factory = CodecFactory::new(FormatTag::Sequitur, &store, DEFAULT_GZIP_LEVEL).unwrap();
    let num_threads = 6;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let factory = factory.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut seq = factory.create(SequenceKind::Long).unwrap();
                let values: Vec<i64> = (0..(t as i64 + 1) * 20).map(|i| i * (t as i64 + 1)).collect();
                for &v in &values {
                    seq.trace(v).unwrap();
                }
                barrier.wait();
                seq.finish().unwrap();
                (seq.location().unwrap(), values)
            })
        })
        .collect();
    let results: Vec<(SequenceLocation, Vec<i64>)> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut ranges: Vec<(u64, u64)> = results
        .iter()
        .map(|(loc, _)| match *loc {
            SequenceLocation::Grammar { offset, count, .. } => (offset, count),
            other => panic!("unexpected location {:?}", other),
        })
        .collect();
    ranges.sort_unstable();
    let mut next = 0;
    for (offset, count) in &ranges {
        assert_eq!(*offset, next);
        next += count;
    }
    let grammar = factory.grammar().unwrap();
    assert_eq!(grammar.len(), next);

    store.close().unwrap();
    let reader = StreamStoreReader::open(dir.path().join("g.bin")).unwrap();
    let loaded = Arc::new(LoadedGrammar::decode(&grammar.encode(6).unwrap()).unwrap());
    for (location, values) in results {
        let seq = SequenceReader::open(
            FormatTag::Sequitur,
            SequenceKind::Long,
            location,
            &reader,
            Some(&loaded),
        )
        .unwrap();
        assert_eq!(seq.to_vec().unwrap(), values);
    }
}

#[test]
fn test_mismatched_format_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("m.bin");
    let store = StreamStore::create(&path, StoreConfig::for_testing()).unwrap();
    store.close().unwrap();
    let reader = StreamStoreReader::open(&path).unwrap();
    let location = SequenceLocation::Grammar {
        offset: 0,
        count: 1,
        sentinel: 0,
    };
    assert!(SequenceReader::open(FormatTag::Gzip, SequenceKind::Long, location, &reader, None).is_err());
    assert!(
        SequenceReader::open(FormatTag::Sequitur, SequenceKind::Long, location, &reader, None).is_err()
    );
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_long_roundtrip(values in prop::collection::vec(any::<i64>(), 0..300)) {
        for format in [FormatTag::Uncompressed, FormatTag::Gzip, FormatTag::Sequitur] {
            let (forward, backward) = roundtrip(format, SequenceKind::Long, &values);
            prop_assert_eq!(&forward, &values);
            prop_assert_eq!(backward, reversed(&values));
        }
    }

    #[test]
    fn prop_repetitive_integer_roundtrip(values in prop::collection::vec(-3i64..3, 0..500)) {
        for format in [FormatTag::Uncompressed, FormatTag::Gzip, FormatTag::Sequitur] {
            let (forward, backward) = roundtrip(format, SequenceKind::Integer, &values);
            prop_assert_eq!(&forward, &values);
            prop_assert_eq!(backward, reversed(&values));
        }
    }
}
