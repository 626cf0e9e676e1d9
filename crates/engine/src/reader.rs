//! Read side of a finished trace file.
//!
//! ```text
//! SessionReader::open(path)
//!     ├── classes()            stream 0
//!     ├── threads()            stream 1
//!     └── thread(id)
//!             └── read_sequence(element) ──► SequenceReader ──► values
//! ```

use crate::catalogue::{decode_catalogue, ClassRecord};
use crate::directory::{decode_directory, ThreadRecord};
use crate::metadata::read_metadata;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use tracestore_codec::{LoadedGrammar, SequenceReader};
use tracestore_core::{ElementId, Error, FormatTag, Result, StreamId};
use tracestore_storage::StreamStoreReader;
use tracing::debug;

/// Reader over a whole trace file.
pub struct SessionReader {
    store: StreamStoreReader,
    classes: Vec<ClassRecord>,
    threads: Vec<ThreadRecord>,
    // Grammars are decoded on first use and shared by every thread
    grammars: Mutex<FxHashMap<StreamId, Arc<LoadedGrammar>>>,
}

impl SessionReader {
    /// Open a trace file and parse its metadata streams.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = StreamStoreReader::open(path)?;
        if store.stream_count() < 2 {
            return Err(Error::corrupt(format!(
                "trace file has {} streams, metadata needs 2",
                store.stream_count()
            )));
        }
        let classes = decode_catalogue(&read_metadata(&store, StreamId::CATALOGUE)?)?;
        let threads = decode_directory(&read_metadata(&store, StreamId::DIRECTORY)?)?;
        debug!(
            target: "tracestore::reader",
            path = %store.path().display(),
            classes = classes.len(),
            threads = threads.len(),
            "Opened trace"
        );
        Ok(SessionReader {
            store,
            classes,
            threads,
            grammars: Mutex::new(FxHashMap::default()),
        })
    }

    /// Instrumented classes in registration order.
    pub fn classes(&self) -> &[ClassRecord] {
        &self.classes
    }

    /// Class owning global instruction `index`.
    pub fn class_of_instruction(&self, index: u32) -> Option<&ClassRecord> {
        let pos = self
            .classes
            .partition_point(|c| c.end_instruction <= index);
        self.classes.get(pos).filter(|c| c.contains(index))
    }

    /// Directory records in write order.
    pub fn threads(&self) -> &[ThreadRecord] {
        &self.threads
    }

    /// Trace of thread `thread_id`.
    pub fn thread(&self, thread_id: u64) -> Option<ThreadTrace<'_>> {
        self.threads
            .iter()
            .find(|t| t.thread_id == thread_id)
            .map(|record| ThreadTrace {
                reader: self,
                record,
            })
    }

    /// Underlying store.
    pub fn store(&self) -> &StreamStoreReader {
        &self.store
    }

    fn grammar(&self, stream: StreamId) -> Result<Arc<LoadedGrammar>> {
        let mut cache = self.grammars.lock();
        if let Some(grammar) = cache.get(&stream) {
            return Ok(Arc::clone(grammar));
        }
        let bytes = self.store.read_stream(stream)?;
        let grammar = Arc::new(LoadedGrammar::decode(&bytes)?);
        debug!(
            target: "tracestore::reader",
            stream = stream.as_u32(),
            rules = grammar.rule_count(),
            values = grammar.len(),
            "Loaded grammar"
        );
        cache.insert(stream, Arc::clone(&grammar));
        Ok(grammar)
    }
}

impl std::fmt::Debug for SessionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionReader")
            .field("path", &self.store.path())
            .field("classes", &self.classes.len())
            .field("threads", &self.threads.len())
            .finish()
    }
}

/// One thread of an open trace.
#[derive(Debug, Clone, Copy)]
pub struct ThreadTrace<'a> {
    reader: &'a SessionReader,
    record: &'a ThreadRecord,
}

impl<'a> ThreadTrace<'a> {
    /// The directory record.
    pub fn record(&self) -> &'a ThreadRecord {
        self.record
    }

    /// Elements this thread traced.
    pub fn elements(&self) -> impl Iterator<Item = ElementId> + 'a {
        self.record.entries.iter().map(|e| e.element)
    }

    /// Reader for the values of `element`, or `None` if never traced.
    pub fn read_sequence(&self, element: ElementId) -> Result<Option<SequenceReader>> {
        let entry = match self.record.entry(element) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let grammar = match (self.record.format, self.record.grammar_stream) {
            (FormatTag::Sequitur, Some(stream)) => Some(self.reader.grammar(stream)?),
            (FormatTag::Sequitur, None) => {
                return Err(Error::corrupt(format!(
                    "sequitur thread {} has no grammar stream",
                    self.record.thread_id
                )))
            }
            _ => None,
        };
        SequenceReader::open(
            self.record.format,
            entry.kind,
            entry.location,
            &self.reader.store,
            grammar.as_ref(),
        )
        .map(Some)
    }
}
