//! Read side of the codecs.
//!
//! A [`SequenceReader`] binds one persisted sequence location to its data
//! and produces lazy iterators over the values, in either direction.

use crate::grammar::{Expansion, LoadedGrammar};
use crate::sequence::SequenceLocation;
use crate::uncompressed::{decode_value, read_value};
use flate2::read::GzDecoder;
use std::io;
use std::sync::Arc;
use tracestore_core::{Error, FormatTag, Result, SequenceKind};
use tracestore_storage::{StreamReader, StreamStoreReader};

/// Lazy iterator over decoded values.
pub struct Values {
    inner: Box<dyn Iterator<Item = Result<i64>> + Send>,
}

impl Values {
    fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<i64>> + Send + 'static,
    {
        Values {
            inner: Box::new(iter),
        }
    }
}

impl Iterator for Values {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Result<i64>> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Values").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Source {
    Plain(StreamReader),
    Gzip(StreamReader),
    Grammar {
        grammar: Arc<LoadedGrammar>,
        offset: u64,
        sentinel: i64,
    },
}

/// Reader for one persisted sequence.
#[derive(Debug, Clone)]
pub struct SequenceReader {
    kind: SequenceKind,
    count: u64,
    source: Source,
}

impl SequenceReader {
    /// Bind a location to its backing data.
    ///
    /// `grammar` must be given for grammar-encoded locations.
    pub fn open(
        format: FormatTag,
        kind: SequenceKind,
        location: SequenceLocation,
        store: &StreamStoreReader,
        grammar: Option<&Arc<LoadedGrammar>>,
    ) -> Result<Self> {
        let count = location.count();
        let source = match (format, location) {
            (FormatTag::Uncompressed, SequenceLocation::Stream { stream, count }) => {
                let reader = store.open_stream(stream)?;
                // An empty sequence's stream ID may have been recycled
                let expected = count.checked_mul(kind.value_width() as u64);
                if count > 0 && expected != Some(reader.len()) {
                    return Err(Error::corrupt(format!(
                        "{} holds {} bytes, expected {} {} values",
                        stream,
                        reader.len(),
                        count,
                        kind
                    )));
                }
                Source::Plain(reader)
            }
            (FormatTag::Gzip, SequenceLocation::Stream { stream, .. }) => {
                Source::Gzip(store.open_stream(stream)?)
            }
            (
                FormatTag::Sequitur,
                SequenceLocation::Grammar {
                    offset, sentinel, ..
                },
            ) => {
                let grammar = grammar
                    .ok_or_else(|| Error::corrupt("grammar sequence without a grammar stream"))?;
                if offset.checked_add(count).map_or(true, |end| end > grammar.len()) {
                    return Err(Error::corrupt(format!(
                        "grammar range {}+{} exceeds {} values",
                        offset,
                        count,
                        grammar.len()
                    )));
                }
                Source::Grammar {
                    grammar: Arc::clone(grammar),
                    offset,
                    sentinel,
                }
            }
            (format, _) => {
                return Err(Error::corrupt(format!(
                    "location does not match format {}",
                    format.name()
                )))
            }
        };
        Ok(SequenceReader {
            kind,
            count,
            source,
        })
    }

    /// Value kind.
    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    /// Number of values.
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Values in trace order.
    pub fn values(&self) -> Result<Values> {
        let (kind, count) = (self.kind, self.count);
        Ok(match &self.source {
            Source::Plain(reader) => {
                let reader = reader.clone();
                let width = kind.value_width() as u64;
                Values::new((0..count).map(move |i| Ok(read_plain(&reader, kind, i * width))))
            }
            Source::Gzip(reader) => {
                let mut decoder = GzDecoder::new(reader.clone());
                let mut left = count;
                Values::new(std::iter::from_fn(move || {
                    if left == 0 {
                        return None;
                    }
                    left -= 1;
                    match read_value(&mut decoder, kind) {
                        Ok(v) => Some(Ok(v)),
                        Err(e) => {
                            left = 0;
                            Some(Err(gzip_error(e)))
                        }
                    }
                }))
            }
            Source::Grammar {
                grammar,
                offset,
                ..
            } => {
                let deltas = Expansion::forward(Arc::clone(grammar), *offset, count)?;
                let mut acc: i64 = 0;
                Values::new(deltas.map(move |d| {
                    acc = acc.wrapping_add(d);
                    Ok(acc)
                }))
            }
        })
    }

    /// Values last to first.
    ///
    /// Gzip sequences are decoded in full first; the other codecs read
    /// backwards directly.
    pub fn values_backward(&self) -> Result<Values> {
        let (kind, count) = (self.kind, self.count);
        Ok(match &self.source {
            Source::Plain(reader) => {
                let reader = reader.clone();
                let width = kind.value_width() as u64;
                Values::new(
                    (0..count)
                        .rev()
                        .map(move |i| Ok(read_plain(&reader, kind, i * width))),
                )
            }
            Source::Gzip(_) => {
                let all = self.to_vec()?;
                Values::new(all.into_iter().rev().map(Ok))
            }
            Source::Grammar {
                grammar,
                offset,
                sentinel,
            } => {
                let deltas = Expansion::backward(Arc::clone(grammar), offset + count, count)?;
                let mut current = *sentinel;
                Values::new(deltas.map(move |d| {
                    let value = current;
                    current = current.wrapping_sub(d);
                    Ok(value)
                }))
            }
        })
    }

    /// Decode every value into memory.
    pub fn to_vec(&self) -> Result<Vec<i64>> {
        self.values()?.collect()
    }
}

fn read_plain(reader: &StreamReader, kind: SequenceKind, offset: u64) -> i64 {
    let mut word = [0u8; 8];
    let width = kind.value_width();
    // Length was checked against the count when the reader was opened
    let n = reader.read_at(offset, &mut word[..width]);
    debug_assert_eq!(n, width);
    decode_value(&word[..width], kind)
}

fn gzip_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::corrupt("gzip sequence shorter than its recorded count")
    } else {
        Error::corrupt(format!("gzip sequence is damaged: {}", e))
    }
}
