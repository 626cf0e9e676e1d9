//! Gzip codec: the fixed-width encoding wrapped in one deflate stream per
//! sequence.

use crate::sequence::{trace_after_finish, SequenceLocation, TraceSequence};
use crate::uncompressed::write_value;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracestore_core::{Error, Result, SequenceKind};
use tracestore_storage::StreamWriter;

/// Compressed bytes are handed to the stream once this much is pending.
const DRAIN_THRESHOLD: usize = 4096;

/// Sequence stored as a gzip member in its own stream.
pub struct GzipSequence {
    kind: SequenceKind,
    writer: StreamWriter,
    // None once finished
    encoder: Option<GzEncoder<Vec<u8>>>,
    count: u64,
}

impl GzipSequence {
    /// Create a sequence compressing at `level` (0-9) into `writer`.
    pub fn new(kind: SequenceKind, writer: StreamWriter, level: u32) -> Self {
        GzipSequence {
            kind,
            writer,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::new(level))),
            count: 0,
        }
    }

    fn drain(writer: &mut StreamWriter, pending: &mut Vec<u8>) -> Result<()> {
        writer.write_bytes(pending)?;
        pending.clear();
        Ok(())
    }
}

impl TraceSequence for GzipSequence {
    fn kind(&self) -> SequenceKind {
        self.kind
    }

    fn trace(&mut self, value: i64) -> Result<()> {
        let encoder = match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Err(trace_after_finish(self.kind)),
        };
        self.kind.check(value)?;
        write_value(encoder, self.kind, value)?;
        self.count += 1;
        if encoder.get_ref().len() >= DRAIN_THRESHOLD {
            Self::drain(&mut self.writer, encoder.get_mut())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None if self.writer.is_closed() => return Ok(()),
            None => {
                return Err(Error::invalid_state(format!(
                    "gzip sequence on {} failed to finish earlier",
                    self.writer.id()
                )))
            }
        };
        let mut tail = encoder.finish()?;
        Self::drain(&mut self.writer, &mut tail)?;
        self.writer.close()
    }

    fn is_ready(&self) -> bool {
        self.encoder.is_none() && self.writer.is_closed()
    }

    fn len(&self) -> u64 {
        self.count
    }

    fn location(&self) -> Option<SequenceLocation> {
        self.is_ready().then(|| SequenceLocation::Stream {
            stream: self.writer.id(),
            count: self.count,
        })
    }
}

impl std::fmt::Debug for GzipSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipSequence")
            .field("kind", &self.kind)
            .field("stream", &self.writer.id())
            .field("count", &self.count)
            .finish()
    }
}
