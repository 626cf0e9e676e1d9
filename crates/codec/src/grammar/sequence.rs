//! Per-element sequence feeding the shared grammar.

use super::shared::SharedGrammar;
use crate::sequence::{trace_after_finish, SequenceLocation, TraceSequence};
use std::sync::Arc;
use tracestore_core::{Result, SequenceKind};
use tracing::trace;

/// Delta-encoded sequence appended to the session grammar at finish.
///
/// Deltas are taken against the previous value of the same sequence (the
/// first against 0) with wrapping arithmetic. The last original value is
/// kept as the sentinel so readers can decode backwards.
#[derive(Debug)]
pub struct GrammarSequence {
    kind: SequenceKind,
    grammar: Arc<SharedGrammar>,
    deltas: Vec<i64>,
    last: i64,
    count: u64,
    location: Option<SequenceLocation>,
}

impl GrammarSequence {
    /// Create a sequence appending to `grammar`.
    pub fn new(kind: SequenceKind, grammar: Arc<SharedGrammar>) -> Self {
        GrammarSequence {
            kind,
            grammar,
            deltas: Vec::new(),
            last: 0,
            count: 0,
            location: None,
        }
    }
}

impl TraceSequence for GrammarSequence {
    fn kind(&self) -> SequenceKind {
        self.kind
    }

    fn trace(&mut self, value: i64) -> Result<()> {
        if self.location.is_some() {
            return Err(trace_after_finish(self.kind));
        }
        self.kind.check(value)?;
        self.deltas.push(value.wrapping_sub(self.last));
        self.last = value;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.location.is_some() {
            return Ok(());
        }
        let offset = self.grammar.append_all(&self.deltas);
        self.deltas = Vec::new();
        self.location = Some(SequenceLocation::Grammar {
            offset,
            count: self.count,
            sentinel: self.last,
        });
        trace!(
            target: "tracestore::codec",
            offset,
            count = self.count,
            "Appended sequence to shared grammar"
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.location.is_some()
    }

    fn len(&self) -> u64 {
        self.count
    }

    fn location(&self) -> Option<SequenceLocation> {
        self.location
    }
}
