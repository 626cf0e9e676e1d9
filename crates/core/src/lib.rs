//! Core types for tracestore
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: error taxonomy (`CorruptFormat`, `Capacity`, `InvalidState`, ...)
//! - StreamId / ElementId: identifiers of virtual streams and traced elements
//! - FormatTag / SequenceKind: tag bytes persisted in the thread directory
//! - encoding: little-endian record helpers for the metadata streams

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ElementId, FormatTag, SequenceKind, StreamId};
