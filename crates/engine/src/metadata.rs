//! Gzip-wrapped record stream used for the two reserved metadata streams.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracestore_core::{Error, Result, StreamId};
use tracestore_storage::{StreamStoreReader, StreamWriter};

const DRAIN_THRESHOLD: usize = 4096;

/// Appends records to a gzip member inside one virtual stream.
pub(crate) struct MetadataStream {
    writer: StreamWriter,
    encoder: GzEncoder<Vec<u8>>,
    records: u64,
}

impl MetadataStream {
    pub(crate) fn new(writer: StreamWriter, level: u32) -> Self {
        MetadataStream {
            writer,
            encoder: GzEncoder::new(Vec::new(), Compression::new(level)),
            records: 0,
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.writer.id()
    }

    /// Append one encoded record.
    pub(crate) fn append(&mut self, record: &[u8]) -> Result<()> {
        self.encoder.write_all(record)?;
        self.records += 1;
        if self.encoder.get_ref().len() >= DRAIN_THRESHOLD {
            self.writer.write_bytes(self.encoder.get_ref())?;
            self.encoder.get_mut().clear();
        }
        Ok(())
    }

    /// Finish the gzip member and close the stream.
    pub(crate) fn finish(self) -> Result<u64> {
        let MetadataStream {
            mut writer,
            encoder,
            records,
        } = self;
        let tail = encoder.finish()?;
        writer.write_bytes(&tail)?;
        writer.close()?;
        Ok(records)
    }
}

impl std::fmt::Debug for MetadataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStream")
            .field("stream", &self.writer.id())
            .field("records", &self.records)
            .finish()
    }
}

/// Read and gunzip a whole metadata stream.
pub(crate) fn read_metadata(store: &StreamStoreReader, id: StreamId) -> Result<Vec<u8>> {
    let compressed = store.read_stream(id)?;
    let mut raw = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| Error::corrupt(format!("{} is not a valid gzip stream: {}", id, e)))?;
    Ok(raw)
}
