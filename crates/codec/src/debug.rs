//! No-op codec. Counts values and persists nothing.

use crate::sequence::{trace_after_finish, SequenceLocation, TraceSequence};
use tracestore_core::{Result, SequenceKind};

/// Sequence that discards every value.
#[derive(Debug)]
pub struct DebugSequence {
    kind: SequenceKind,
    count: u64,
    ready: bool,
}

impl DebugSequence {
    /// Create a discarding sequence.
    pub fn new(kind: SequenceKind) -> Self {
        DebugSequence {
            kind,
            count: 0,
            ready: false,
        }
    }
}

impl TraceSequence for DebugSequence {
    fn kind(&self) -> SequenceKind {
        self.kind
    }

    fn trace(&mut self, value: i64) -> Result<()> {
        if self.ready {
            return Err(trace_after_finish(self.kind));
        }
        self.kind.check(value)?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn len(&self) -> u64 {
        self.count
    }

    fn location(&self) -> Option<SequenceLocation> {
        None
    }
}
