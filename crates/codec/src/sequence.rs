//! Trace sequence contract and persisted sequence locations.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use tracestore_core::encoding::truncated;
use tracestore_core::{Error, FormatTag, Result, SequenceKind, StreamId};

/// Append-only log of values produced by one traced element in one thread.
///
/// # Lifecycle
///
/// ```text
/// trace()* ──► finish() ──► write_out()
/// ```
///
/// `finish()` is idempotent; once it has succeeded the sequence's
/// [`location`](Self::location) never changes. Tracing after finish fails
/// with `InvalidState`.
pub trait TraceSequence: Send {
    /// Declared value kind.
    fn kind(&self) -> SequenceKind;

    /// Append one value.
    ///
    /// Integer sequences reject values outside the `i32` range with
    /// `ValueOutOfRange`; the sequence stays usable.
    fn trace(&mut self, value: i64) -> Result<()>;

    /// Flush all values through the codec.
    fn finish(&mut self) -> Result<()>;

    /// Whether `finish()` has completed.
    fn is_ready(&self) -> bool;

    /// Number of values accepted so far.
    fn len(&self) -> u64;

    /// Whether no values have been accepted.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persisted location, available once finished.
    ///
    /// `None` for codecs that do not persist values.
    fn location(&self) -> Option<SequenceLocation>;

    /// Write this sequence's directory record (kind and location).
    ///
    /// Finishes the sequence first if needed. Writes nothing for codecs that
    /// do not persist values.
    fn write_out(&mut self, out: &mut dyn Write) -> Result<()> {
        self.finish()?;
        match self.location() {
            Some(location) => {
                out.write_u8(self.kind().as_byte())?;
                location.write_to(out)
            }
            None => Ok(()),
        }
    }
}

/// Where a finished sequence's values live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceLocation {
    /// A private virtual stream (uncompressed and gzip codecs).
    Stream {
        /// Backing stream
        stream: StreamId,
        /// Number of values
        count: u64,
    },
    /// A range of the session's shared grammar output.
    Grammar {
        /// First position in the shared output
        offset: u64,
        /// Number of values
        count: u64,
        /// Last original value, for backward decoding
        sentinel: i64,
    },
}

impl SequenceLocation {
    /// Number of values at this location.
    pub fn count(&self) -> u64 {
        match *self {
            SequenceLocation::Stream { count, .. } | SequenceLocation::Grammar { count, .. } => {
                count
            }
        }
    }

    /// Serialize the location fields.
    pub fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        match *self {
            SequenceLocation::Stream { stream, count } => {
                out.write_u32::<LittleEndian>(stream.as_u32())?;
                out.write_u64::<LittleEndian>(count)?;
            }
            SequenceLocation::Grammar {
                offset,
                count,
                sentinel,
            } => {
                out.write_u64::<LittleEndian>(offset)?;
                out.write_u64::<LittleEndian>(count)?;
                out.write_i64::<LittleEndian>(sentinel)?;
            }
        }
        Ok(())
    }

    /// Deserialize location fields for a thread recorded with `format`.
    pub fn read_from<R: Read + ?Sized>(format: FormatTag, input: &mut R) -> Result<Self> {
        let ctx = "sequence location";
        match format {
            FormatTag::Uncompressed | FormatTag::Gzip => Ok(SequenceLocation::Stream {
                stream: StreamId(input.read_u32::<LittleEndian>().map_err(truncated(ctx))?),
                count: input.read_u64::<LittleEndian>().map_err(truncated(ctx))?,
            }),
            FormatTag::Sequitur => Ok(SequenceLocation::Grammar {
                offset: input.read_u64::<LittleEndian>().map_err(truncated(ctx))?,
                count: input.read_u64::<LittleEndian>().map_err(truncated(ctx))?,
                sentinel: input.read_i64::<LittleEndian>().map_err(truncated(ctx))?,
            }),
            FormatTag::Debug => Err(Error::corrupt(
                "debug format threads carry no sequence records",
            )),
        }
    }
}

/// Error for tracing into a finished sequence.
pub(crate) fn trace_after_finish(kind: SequenceKind) -> Error {
    Error::invalid_state(format!("trace after finish on {} sequence", kind))
}
