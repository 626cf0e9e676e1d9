//! Fixed-width little-endian codec, one private stream per sequence.

use crate::sequence::{trace_after_finish, SequenceLocation, TraceSequence};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use tracestore_core::{Result, SequenceKind};
use tracestore_storage::StreamWriter;

/// Write one value using the kind's fixed width.
pub(crate) fn write_value<W: Write + ?Sized>(
    out: &mut W,
    kind: SequenceKind,
    value: i64,
) -> io::Result<()> {
    match kind {
        SequenceKind::Integer => out.write_i32::<LittleEndian>(value as i32),
        SequenceKind::Long | SequenceKind::Object => out.write_i64::<LittleEndian>(value),
    }
}

/// Read one value written by [`write_value`].
pub(crate) fn read_value<R: Read + ?Sized>(input: &mut R, kind: SequenceKind) -> io::Result<i64> {
    match kind {
        SequenceKind::Integer => input.read_i32::<LittleEndian>().map(i64::from),
        SequenceKind::Long | SequenceKind::Object => input.read_i64::<LittleEndian>(),
    }
}

/// Encode one value into a scratch word, returning the used width.
pub(crate) fn encode_value(kind: SequenceKind, value: i64) -> ([u8; 8], usize) {
    let mut word = [0u8; 8];
    match kind {
        SequenceKind::Integer => word[..4].copy_from_slice(&(value as i32).to_le_bytes()),
        SequenceKind::Long | SequenceKind::Object => word.copy_from_slice(&value.to_le_bytes()),
    }
    (word, kind.value_width())
}

/// Decode one value from an exactly sized slice.
pub(crate) fn decode_value(bytes: &[u8], kind: SequenceKind) -> i64 {
    match kind {
        SequenceKind::Integer => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
        }
        SequenceKind::Long | SequenceKind::Object => {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            i64::from_le_bytes(word)
        }
    }
}

/// Sequence stored as raw fixed-width values.
#[derive(Debug)]
pub struct UncompressedSequence {
    kind: SequenceKind,
    writer: StreamWriter,
    count: u64,
    ready: bool,
}

impl UncompressedSequence {
    /// Create a sequence writing into `writer`.
    pub fn new(kind: SequenceKind, writer: StreamWriter) -> Self {
        UncompressedSequence {
            kind,
            writer,
            count: 0,
            ready: false,
        }
    }
}

impl TraceSequence for UncompressedSequence {
    fn kind(&self) -> SequenceKind {
        self.kind
    }

    fn trace(&mut self, value: i64) -> Result<()> {
        if self.ready {
            return Err(trace_after_finish(self.kind));
        }
        self.kind.check(value)?;
        let (word, width) = encode_value(self.kind, value);
        self.writer.write_bytes(&word[..width])?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        self.writer.close()?;
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn len(&self) -> u64 {
        self.count
    }

    fn location(&self) -> Option<SequenceLocation> {
        self.ready.then(|| SequenceLocation::Stream {
            stream: self.writer.id(),
            count: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tracestore_core::{Error, StreamId};
    use tracestore_storage::{StoreConfig, StreamStore, StreamStoreReader};

    #[test]
    fn test_integer_layout_is_fixed_width() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let store = StreamStore::create(&path, StoreConfig::for_testing()).unwrap();
        let mut seq = UncompressedSequence::new(SequenceKind::Integer, store.create_stream().unwrap());
        for v in [10, 12, 12, 12, 9] {
            seq.trace(v).unwrap();
        }
        seq.finish().unwrap();
        store.close().unwrap();

        let reader = StreamStoreReader::open(&path).unwrap();
        let bytes = reader.read_stream(StreamId(0)).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..4], &10i32.to_le_bytes());
        assert_eq!(&bytes[16..], &9i32.to_le_bytes());
    }

    #[test]
    fn test_out_of_range_integer_is_recoverable() {
        let dir = tempdir().unwrap();
        let store = StreamStore::create(dir.path().join("t.bin"), StoreConfig::for_testing()).unwrap();
        let mut seq = UncompressedSequence::new(SequenceKind::Integer, store.create_stream().unwrap());
        let err = seq.trace(i64::from(i32::MAX) + 1).unwrap_err();
        assert!(err.is_recoverable());
        seq.trace(1).unwrap();
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_capacity_failure_keeps_whole_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        // Header, one data block and the table
        let store =
            StreamStore::create(&path, StoreConfig::for_testing().with_max_blocks(3)).unwrap();
        let mut seq = UncompressedSequence::new(SequenceKind::Long, store.create_stream().unwrap());
        let mut traced = Vec::new();
        for v in 0..20i64 {
            match seq.trace(v * 3) {
                Ok(()) => traced.push(v * 3),
                Err(e) => assert!(matches!(e, Error::Capacity(_))),
            }
        }
        // 124 payload bytes hold 15 whole longs; the 16th would straddle
        assert_eq!(traced.len(), 15);
        seq.finish().unwrap();
        let location = seq.location().unwrap();
        drop(seq);
        store.close().unwrap();

        let reader = StreamStoreReader::open(&path).unwrap();
        assert_eq!(reader.stream_len(StreamId(0)), Some(15 * 8));
        let values = crate::reader::SequenceReader::open(
            tracestore_core::FormatTag::Uncompressed,
            SequenceKind::Long,
            location,
            &reader,
            None,
        )
        .unwrap()
        .to_vec()
        .unwrap();
        assert_eq!(values, traced);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StreamStore::create(dir.path().join("t.bin"), StoreConfig::for_testing()).unwrap();
        let mut seq = UncompressedSequence::new(SequenceKind::Long, store.create_stream().unwrap());
        assert!(seq.location().is_none());
        seq.trace(-1).unwrap();
        seq.finish().unwrap();
        let first = seq.location();
        seq.finish().unwrap();
        assert_eq!(seq.location(), first);
        assert!(matches!(seq.trace(2), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_decode_value_matches_read_value() {
        let mut buf = Vec::new();
        write_value(&mut buf, SequenceKind::Object, 1 << 40).unwrap();
        assert_eq!(decode_value(&buf, SequenceKind::Object), 1 << 40);
        assert_eq!(read_value(&mut buf.as_slice(), SequenceKind::Object).unwrap(), 1 << 40);
    }
}
