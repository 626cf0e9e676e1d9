//! Integration tests for the multiplexed stream store
//!
//! These tests exercise the store as a complete system:
//! - Interleaved writers producing independent streams
//! - Concurrent stream creation and writes
//! - Reopening and validating closed files
//! - Corruption and capacity handling

use std::io::{Read, Write};
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use tracestore_core::{Error, StreamId};
use tracestore_storage::{StoreConfig, StreamStore, StreamStoreReader};

// ============================================================================
// Helper Functions
// ============================================================================

fn testing_store(dir: &std::path::Path) -> (std::path::PathBuf, StreamStore) {
    let path = dir.join("trace.bin");
    let store = StreamStore::create(&path, StoreConfig::for_testing()).unwrap();
    (path, store)
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[test]
fn test_three_streams_assigned_in_order() {
    let dir = tempdir().unwrap();
    let (path, store) = testing_store(dir.path());

    let mut catalogue = store.create_stream().unwrap();
    let mut directory = store.create_stream().unwrap();
    let mut data = store.create_stream().unwrap();
    assert_eq!(catalogue.id(), StreamId::CATALOGUE);
    assert_eq!(directory.id(), StreamId::DIRECTORY);
    assert_eq!(data.id(), StreamId(2));

    data.write_all(b"hello").unwrap();
    catalogue.write_all(b"classes").unwrap();
    directory.write_all(b"threads").unwrap();
    for s in [&mut catalogue, &mut directory, &mut data] {
        s.close().unwrap();
    }
    store.close().unwrap();

    let reader = StreamStoreReader::open(&path).unwrap();
    assert_eq!(reader.read_stream(StreamId(2)).unwrap(), b"hello");
    assert_eq!(reader.read_stream(StreamId::CATALOGUE).unwrap(), b"classes");
    assert_eq!(reader.read_stream(StreamId::DIRECTORY).unwrap(), b"threads");
    assert_eq!(reader.session_uuid(), store.session_uuid());
}

#[test]
fn test_interleaved_writes_stay_separate() {
    let dir = tempdir().unwrap();
    let (path, store) = testing_store(dir.path());
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    let mut writers: Vec<_> = (0..5).map(|_| store.create_stream().unwrap()).collect();
    let mut expected = vec![Vec::new(); writers.len()];

    for _ in 0..2_000 {
        let i = rng.gen_range(0..writers.len());
        let len = rng.gen_range(1..40);
        let chunk: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        writers[i].write_all(&chunk).unwrap();
        expected[i].extend_from_slice(&chunk);
    }
    for w in &mut writers {
        w.close().unwrap();
    }
    store.close().unwrap();

    let reader = StreamStoreReader::open(&path).unwrap();
    for (i, bytes) in expected.iter().enumerate() {
        assert_eq!(&reader.read_stream(StreamId(i as u32)).unwrap(), bytes);
    }
}

#[test]
fn test_concurrent_writers() {
    let dir = tempdir().unwrap();
    let (path, store) = testing_store(dir.path());
    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut w = store.create_stream().unwrap();
                for i in 0..500u32 {
                    w.write_all(&(t as u32 * 1_000_000 + i).to_le_bytes())
                        .unwrap();
                }
                w.close().unwrap();
                (w.id(), t as u32)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    store.close().unwrap();

    let mut ids: Vec<_> = results.iter().map(|(id, _)| id.0).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..num_threads as u32).collect::<Vec<_>>());

    let reader = StreamStoreReader::open(&path).unwrap();
    for (id, t) in results {
        let mut stream = reader.open_stream(id).unwrap();
        let mut word = [0u8; 4];
        for i in 0..500u32 {
            stream.read_exact(&mut word).unwrap();
            assert_eq!(u32::from_le_bytes(word), t * 1_000_000 + i);
        }
        assert_eq!(stream.read(&mut word).unwrap(), 0);
    }
}

#[test]
fn test_larger_block_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big.bin");
    let store = StreamStore::create(&path, StoreConfig::new().with_block_size(512)).unwrap();
    let mut w = store.create_stream().unwrap();
    let data: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 256) as u8).collect();
    w.write_all(&data).unwrap();
    w.close().unwrap();
    let summary = store.close().unwrap();
    assert_eq!(summary.payload_bytes, 5000);

    let reader = StreamStoreReader::open(&path).unwrap();
    assert_eq!(reader.block_size(), 512);
    assert_eq!(reader.read_stream(StreamId(0)).unwrap(), data);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[test]
fn test_capacity_exhaustion_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.bin");
    let store =
        StreamStore::create(&path, StoreConfig::for_testing().with_max_blocks(4)).unwrap();
    let mut a = store.create_stream().unwrap();
    let mut b = store.create_stream().unwrap();
    let payload = StoreConfig::for_testing().payload_size();

    a.write_all(&vec![1u8; payload * 2]).unwrap();
    b.write_all(&vec![2u8; payload]).unwrap();
    let err = b.write_bytes(&[3u8]).unwrap_err();
    assert!(matches!(err, Error::Capacity(_)));
    assert!(!err.is_recoverable());
}

#[test]
fn test_truncated_file_rejected() {
    let dir = tempdir().unwrap();
    let (path, store) = testing_store(dir.path());
    let mut w = store.create_stream().unwrap();
    w.write_all(&[9u8; 1000]).unwrap();
    w.close().unwrap();
    store.close().unwrap();
    drop(store);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        StreamStoreReader::open(&path),
        Err(Error::CorruptFormat(_))
    ));
}

#[test]
fn test_not_a_trace_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("junk.bin");
    std::fs::write(&path, vec![0xABu8; 4096]).unwrap();
    assert!(matches!(
        StreamStoreReader::open(&path),
        Err(Error::CorruptFormat(_))
    ));
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_streams_roundtrip(
        streams in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..700), 1..6)
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prop.bin");
        let store = StreamStore::create(
            &path,
            StoreConfig::for_testing().with_reuse_stream_ids(false),
        )
        .unwrap();

        let mut writers: Vec<_> = streams.iter().map(|_| store.create_stream().unwrap()).collect();
        // Round-robin small chunks to force interleaving
        let mut offsets = vec![0usize; streams.len()];
        loop {
            let mut progressed = false;
            for (i, data) in streams.iter().enumerate() {
                if offsets[i] < data.len() {
                    let end = (offsets[i] + 17).min(data.len());
                    writers[i].write_all(&data[offsets[i]..end]).unwrap();
                    offsets[i] = end;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        for w in &mut writers {
            w.close().unwrap();
        }
        store.close().unwrap();

        let reader = StreamStoreReader::open(&path).unwrap();
        for (i, data) in streams.iter().enumerate() {
            prop_assert_eq!(&reader.read_stream(StreamId(i as u32)).unwrap(), data);
        }
    }
}
