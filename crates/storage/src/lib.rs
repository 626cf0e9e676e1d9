//! Multiplexed stream store for tracestore
//!
//! This crate implements the virtual stream layer: many independent,
//! append-only byte streams interleaved in one physical file.
//! - StreamStore / StreamWriter: block allocation and chained writes
//! - StreamStoreReader / StreamReader: memory-mapped reads with seek
//! - format: header, block link and stream table layout
//! - StoreConfig: block size, capacity and ID recycling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod format;
pub mod reader;
pub mod writer;

pub use config::{StoreConfig, StoreConfigError};
pub use reader::{StreamReader, StreamStoreReader};
pub use writer::{StoreSummary, StreamStore, StreamWriter};
