//! Error types for tracestore
//!
//! This module defines the error taxonomy shared by every layer of the trace
//! storage engine. We use `thiserror` for automatic `Display` and `Error`
//! trait implementations.
//!
//! | Variant | Severity |
//! |---------|----------|
//! | `CorruptFormat` | fatal to the read path |
//! | `Capacity` | fatal to the write session |
//! | `InvalidState` | caller contract violation |
//! | `ValueOutOfRange` | recoverable, counted per session |
//! | `WriteOutFailed` | reported to every waiter of a write-out |

use std::io;
use thiserror::Error;

/// Result type alias for tracestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the trace storage engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Persisted data is malformed (bad magic, checksum, unknown tag, ...)
    #[error("Corrupt trace format: {0}")]
    CorruptFormat(String),

    /// The physical store cannot grow any further
    #[error("Capacity exhausted: {0}")]
    Capacity(String),

    /// Operation not permitted in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A traced value does not fit the sequence's declared kind
    #[error("Value {value} out of range for {kind} sequence")]
    ValueOutOfRange {
        /// Offending value
        value: i64,
        /// Name of the sequence kind
        kind: &'static str,
    },

    /// Serializing a thread's trace failed; every waiter observes this
    #[error("Write-out of thread {thread_id} failed: {message}")]
    WriteOutFailed {
        /// Numeric trace id of the thread
        thread_id: u64,
        /// Message of the original failure
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for [`Error::CorruptFormat`].
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptFormat(msg.into())
    }

    /// Shorthand for [`Error::InvalidState`].
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Shorthand for [`Error::Capacity`].
    pub fn capacity(msg: impl Into<String>) -> Self {
        Error::Capacity(msg.into())
    }

    /// Whether the session may continue after this error.
    ///
    /// Per-element failures are recoverable; format, capacity and contract
    /// violations are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ValueOutOfRange { .. } | Error::IoError(_) | Error::WriteOutFailed { .. }
        )
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::IoError(inner) => inner,
            Error::CorruptFormat(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
