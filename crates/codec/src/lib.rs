//! Trace sequence codecs for tracestore
//!
//! This crate turns per-element value logs into persisted bytes:
//! - TraceSequence: the append/finish/write-out contract
//! - UncompressedSequence / GzipSequence: one private stream per sequence
//! - GrammarSequence: delta values feeding a session-wide Sequitur grammar
//! - DebugSequence: discards values
//! - CodecFactory: per-session codec selection
//! - SequenceReader: lazy forward and backward decoding

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod debug;
pub mod factory;
pub mod grammar;
pub mod gzip;
pub mod reader;
pub mod sequence;
pub mod uncompressed;

pub use debug::DebugSequence;
pub use factory::{CodecFactory, DEFAULT_GZIP_LEVEL};
pub use grammar::{GrammarSequence, GrammarStats, LoadedGrammar, SharedGrammar};
pub use gzip::GzipSequence;
pub use reader::{SequenceReader, Values};
pub use sequence::{SequenceLocation, TraceSequence};
pub use uncompressed::UncompressedSequence;
