//! Per-thread trace management for tracestore
//!
//! This crate owns everything that coordinates threads:
//! - WriteGate: single-shot gate giving exactly-once write-out
//! - ThreadTracer: one thread's sequences, pause counter and lifecycle
//! - ThreadRegistry: live threads, owner tokens and the pending queue

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gate;
pub mod registry;
pub mod tracer;

pub use gate::WriteGate;
pub use registry::ThreadRegistry;
pub use tracer::{ThreadSnapshot, ThreadTracer, TracerState};
