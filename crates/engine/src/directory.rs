//! Thread trace directory (stream 1).
//!
//! One record per written thread, appended as threads finish.
//!
//! ## Record layout
//!
//! ```text
//! thread id      u64
//! name           u32 length + UTF-8
//! format tag     u8     0 debug, 1 gzip, 2 sequitur, 3 uncompressed
//! grammar stream u32    sequitur only
//! value count    u64
//! entry count    u32
//! entries        element u32, kind u8, location (format specific)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use tracestore_codec::SequenceLocation;
use tracestore_concurrency::ThreadSnapshot;
use tracestore_core::encoding::{read_string, read_u8_or_eof, truncated, write_string};
use tracestore_core::{ElementId, Error, FormatTag, Result, SequenceKind, StreamId};

/// One sequence of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceEntry {
    /// Traced element
    pub element: ElementId,
    /// Value kind
    pub kind: SequenceKind,
    /// Where the values are stored
    pub location: SequenceLocation,
}

/// Directory record of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    /// Numeric trace id
    pub thread_id: u64,
    /// Thread name
    pub name: String,
    /// Codec of every sequence of this thread
    pub format: FormatTag,
    /// Stream holding the shared grammar, for sequitur threads
    pub grammar_stream: Option<StreamId>,
    /// Values recorded by the thread
    pub values: u64,
    /// Sequences in element order
    pub entries: Vec<SequenceEntry>,
}

impl ThreadRecord {
    /// Entry for `element`, if the thread traced it.
    pub fn entry(&self, element: ElementId) -> Option<&SequenceEntry> {
        self.entries
            .binary_search_by_key(&element, |e| e.element)
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// Encode a written-out thread as a directory record.
///
/// The snapshot's records are already in `element, kind, location` form.
pub(crate) fn encode_snapshot(
    format: FormatTag,
    grammar_stream: Option<StreamId>,
    snapshot: &ThreadSnapshot,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32 + snapshot.name.len() + snapshot.records.len());
    out.write_u64::<LittleEndian>(snapshot.thread_id)?;
    write_string(&mut out, &snapshot.name)?;
    out.write_u8(format.as_byte())?;
    if format == FormatTag::Sequitur {
        let stream = grammar_stream
            .ok_or_else(|| Error::invalid_state("sequitur session without a grammar stream"))?;
        out.write_u32::<LittleEndian>(stream.as_u32())?;
    }
    out.write_u64::<LittleEndian>(snapshot.values)?;
    out.write_u32::<LittleEndian>(snapshot.record_count)?;
    out.extend_from_slice(&snapshot.records);
    Ok(out)
}

fn decode_record(input: &mut Cursor<&[u8]>, tag: u8) -> Result<ThreadRecord> {
    let ctx = "thread record";
    // The first byte of the thread id was consumed by the end-of-stream probe
    let mut rest = [0u8; 7];
    std::io::Read::read_exact(input, &mut rest).map_err(truncated(ctx))?;
    let mut id = [0u8; 8];
    id[0] = tag;
    id[1..].copy_from_slice(&rest);
    let thread_id = u64::from_le_bytes(id);

    let name = read_string(input)?;
    let format = FormatTag::from_byte(input.read_u8().map_err(truncated(ctx))?)?;
    let grammar_stream = if format == FormatTag::Sequitur {
        Some(StreamId(input.read_u32::<LittleEndian>().map_err(truncated(ctx))?))
    } else {
        None
    };
    let values = input.read_u64::<LittleEndian>().map_err(truncated(ctx))?;
    let count = input.read_u32::<LittleEndian>().map_err(truncated(ctx))?;
    if format == FormatTag::Debug && count > 0 {
        return Err(Error::corrupt(format!(
            "debug thread {} lists {} sequences",
            thread_id, count
        )));
    }

    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        let element = ElementId(input.read_u32::<LittleEndian>().map_err(truncated(ctx))?);
        let kind = SequenceKind::from_byte(input.read_u8().map_err(truncated(ctx))?)?;
        let location = SequenceLocation::read_from(format, input)?;
        if let Some(last) = entries.last().map(|e: &SequenceEntry| e.element) {
            if last >= element {
                return Err(Error::corrupt(format!(
                    "thread {} lists {} after {}",
                    thread_id, element, last
                )));
            }
        }
        entries.push(SequenceEntry {
            element,
            kind,
            location,
        });
    }

    Ok(ThreadRecord {
        thread_id,
        name,
        format,
        grammar_stream,
        values,
        entries,
    })
}

/// Parse the uncompressed contents of the directory stream.
pub fn decode_directory(bytes: &[u8]) -> Result<Vec<ThreadRecord>> {
    let mut input = Cursor::new(bytes);
    let mut records = Vec::new();
    while let Some(first) = read_u8_or_eof(&mut input)? {
        records.push(decode_record(&mut input, first)?);
    }
    Ok(records)
}
