//! tracestore - multiplexed, compressed execution-trace storage
//!
//! A trace file holds many append-only virtual streams in one physical
//! file. Each thread of the traced program gets one value sequence per
//! traced element, encoded by the codec chosen for the session.
//!
//! # Quick Start
//!
//! ```ignore
//! use tracestore::{SequenceKind, SessionReader, TraceConfig, TraceSession};
//!
//! let session = TraceSession::create("run.trace", TraceConfig::default())?;
//! let element = session.register_sequence(SequenceKind::Integer);
//! session.trace(element, 42);
//! session.finish()?;
//!
//! let reader = SessionReader::open("run.trace")?;
//! for thread in reader.threads() {
//!     let values = reader
//!         .thread(thread.thread_id)
//!         .and_then(|t| t.read_sequence(element).transpose());
//! }
//! ```
//!
//! # Architecture
//!
//! | layer | crate |
//! |-------|-------|
//! | errors, ids, tags | `tracestore-core` |
//! | block file with virtual streams | `tracestore-storage` |
//! | codecs and grammar compression | `tracestore-codec` |
//! | per-thread tracers and registry | `tracestore-concurrency` |
//! | sessions, metadata, reading | `tracestore-engine` |

pub use tracestore_codec::{
    CodecFactory, GrammarStats, SequenceLocation, SequenceReader, TraceSequence, Values,
};
pub use tracestore_core::{ElementId, Error, FormatTag, Result, SequenceKind, StreamId};
pub use tracestore_engine::{
    global, ClassRecord, ConfigError, SessionReader, SessionSummary, ThreadRecord, ThreadTrace,
    TraceConfig, TraceSession, CONFIG_FILE_NAME,
};
pub use tracestore_storage::{StoreConfig, StreamStore, StreamStoreReader};
