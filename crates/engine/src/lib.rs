//! Trace session engine for tracestore
//!
//! This crate ties the lower layers into a trace file:
//! - TraceSession: element registry, per-thread tracing, finish protocol
//! - ClassCatalogue / directory: the two reserved metadata streams
//! - SessionReader: opening a finished trace and decoding sequences
//! - TraceConfig: `tracestore.toml` settings
//! - global: the process-wide session used by instrumentation hooks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalogue;
pub mod config;
pub mod directory;
pub mod global;
mod metadata;
pub mod reader;
pub mod session;

pub use catalogue::{ClassCatalogue, ClassRecord};
pub use config::{ConfigError, TraceConfig, CONFIG_FILE_NAME};
pub use directory::{SequenceEntry, ThreadRecord};
pub use reader::{SessionReader, ThreadTrace};
pub use session::{SessionSummary, TraceSession};

#[cfg(test)]
mod send_sync_tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(TraceSession: Send, Sync, Clone);
    assert_impl_all!(SessionReader: Send, Sync);
    assert_impl_all!(TraceConfig: Send, Sync, Clone);
}
