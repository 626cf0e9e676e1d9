//! End-to-end scenarios through the public facade.

use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tracestore::{
    FormatTag, SequenceKind, SequenceLocation, SessionReader, StoreConfig, StreamId, StreamStore,
    StreamStoreReader, TraceConfig, TraceSession, CONFIG_FILE_NAME,
};

fn trace_file(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("scenario.trace")
}

#[test]
fn fresh_store_assigns_reserved_ids_first() {
    let dir = TempDir::new().unwrap();
    let store = StreamStore::create(trace_file(&dir), StoreConfig::default()).unwrap();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut writer = store.create_stream().unwrap();
        writer.write_bytes(b"x").unwrap();
        ids.push(writer.id());
        writer.close().unwrap();
    }
    assert_eq!(ids, vec![StreamId::CATALOGUE, StreamId::DIRECTORY, StreamId(2)]);
    store.close().unwrap();
    assert_eq!(StreamStoreReader::open(trace_file(&dir)).unwrap().stream_count(), 3);
}

#[test]
fn two_grammar_threads_cover_six_values() {
    let dir = TempDir::new().unwrap();
    let session = TraceSession::create(trace_file(&dir), TraceConfig::default()).unwrap();
    let element = session.register_sequence(SequenceKind::Integer);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2i64)
        .map(|t| {
            let session = session.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for v in [5, 6, 7] {
                    session.trace(element, v + t);
                }
                barrier.wait();
                session.thread_exits();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    session.finish().unwrap();

    let reader = SessionReader::open(trace_file(&dir)).unwrap();
    let mut ranges = Vec::new();
    for thread in reader.threads() {
        let entry = thread.entry(element).unwrap();
        if let SequenceLocation::Grammar { offset, count, .. } = entry.location {
            ranges.push(offset..offset + count);
        }
        let values = reader
            .thread(thread.thread_id)
            .unwrap()
            .read_sequence(element)
            .unwrap()
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[1] - values[0], 1);
    }
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges.iter().map(|r| r.end - r.start).sum::<u64>(), 6);
    assert!(ranges[0].end <= ranges[1].start || ranges[1].end <= ranges[0].start);
}

#[test]
fn repetitive_trace_compresses_below_raw_size() {
    let dir = TempDir::new().unwrap();
    let session = TraceSession::create(trace_file(&dir), TraceConfig::default()).unwrap();
    let element = session.register_sequence(SequenceKind::Long);
    let pattern = [3i64, 1, 4, 1, 5, 9, 2, 6];
    for round in 0..5_000 {
        session.trace(element, pattern[round % pattern.len()]);
    }
    let summary = session.finish().unwrap();
    // Raw encoding would need 40_000 bytes
    assert!(summary.store.payload_bytes < 4_000, "{:?}", summary.store);

    let reader = SessionReader::open(trace_file(&dir)).unwrap();
    let thread = &reader.threads()[0];
    let seq = reader
        .thread(thread.thread_id)
        .unwrap()
        .read_sequence(element)
        .unwrap()
        .unwrap();
    let values = seq.to_vec().unwrap();
    assert_eq!(values.len(), 5_000);
    assert!(values
        .iter()
        .enumerate()
        .all(|(i, &v)| v == pattern[i % pattern.len()]));
}

#[test]
fn config_file_drives_session() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&config_path, "format = \"gzip\"\nblock_size = 1024\n").unwrap();
    let config = TraceConfig::from_file(&config_path).unwrap();
    let session = TraceSession::create(trace_file(&dir), config).unwrap();
    assert_eq!(session.format(), FormatTag::Gzip);
    let element = session.register_sequence(SequenceKind::Object);
    session.trace(element, 0xdead_beef);
    session.finish().unwrap();

    let reader = SessionReader::open(trace_file(&dir)).unwrap();
    assert_eq!(reader.store().block_size(), 1024);
    assert_eq!(reader.threads()[0].format, FormatTag::Gzip);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn random_traces_roundtrip(seed in any::<u64>(), format_idx in 0usize..3) {
        let format = [FormatTag::Uncompressed, FormatTag::Gzip, FormatTag::Sequitur][format_idx];
        let dir = TempDir::new().unwrap();
        let config = TraceConfig { block_size: 256, ..TraceConfig::with_format(format) };
        let session = TraceSession::create(trace_file(&dir), config).unwrap();
        let elements: Vec<_> = (0..4)
            .map(|_| session.register_sequence(SequenceKind::Long))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut expected = vec![Vec::new(); elements.len()];
        for _ in 0..rng.gen_range(0..400) {
            let which = rng.gen_range(0..elements.len());
            let value = rng.gen_range(-50i64..50);
            session.trace(elements[which], value);
            expected[which].push(value);
        }
        session.finish().unwrap();

        let reader = SessionReader::open(trace_file(&dir)).unwrap();
        for (element, values) in elements.iter().zip(&expected) {
            let decoded = match reader.threads().first() {
                Some(thread) => reader
                    .thread(thread.thread_id)
                    .unwrap()
                    .read_sequence(*element)
                    .unwrap()
                    .map(|s| s.to_vec().unwrap())
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            prop_assert_eq!(&decoded, values);
        }
    }
}
