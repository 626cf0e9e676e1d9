//! Per-thread trace context.
//!
//! ## State Machine
//!
//! ```text
//! Unstarted ──start()──► Active ⇄ Paused
//!     │                    │
//!     └──────finish()──────┴──► Finished ──write_out()──► Written
//! ```
//!
//! Pausing is a re-entrant counter: instrumentation pauses around its own
//! work so it is never traced itself. Values arriving while the tracer is
//! unstarted, paused, finished or written are dropped.

use crate::gate::WriteGate;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracestore_codec::{CodecFactory, TraceSequence};
use tracestore_core::{ElementId, Error, Result, SequenceKind};
use tracing::{debug, warn};

/// Observable tracer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerState {
    /// Created before tracing was started
    Unstarted,
    /// Recording values
    Active,
    /// Active, but inside at least one pause
    Paused,
    /// All sequences finished, record not yet written
    Finished,
    /// Directory record written
    Written,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unstarted,
    Active,
    Finished,
    Written,
}

struct TracerInner {
    phase: Phase,
    pause_depth: u32,
    sequences: BTreeMap<ElementId, Box<dyn TraceSequence>>,
    values: u64,
}

/// Everything the directory needs about a written thread.
#[derive(Debug)]
pub struct ThreadSnapshot {
    /// Numeric trace id
    pub thread_id: u64,
    /// Thread name
    pub name: String,
    /// Number of sequence records in `records`
    pub record_count: u32,
    /// Concatenated `(element id, sequence record)` pairs
    pub records: Vec<u8>,
    /// Values accepted across all sequences
    pub values: u64,
    /// Sequences that failed to finish; they have no record
    pub failures: Vec<(ElementId, Error)>,
}

/// Trace context of one thread.
pub struct ThreadTracer {
    id: u64,
    name: String,
    inner: Mutex<TracerInner>,
    gate: WriteGate,
}

impl ThreadTracer {
    /// Create a tracer; `started` selects `Active` over `Unstarted`.
    pub fn new(id: u64, name: impl Into<String>, started: bool) -> Self {
        ThreadTracer {
            id,
            name: name.into(),
            inner: Mutex::new(TracerInner {
                phase: if started {
                    Phase::Active
                } else {
                    Phase::Unstarted
                },
                pause_depth: 0,
                sequences: BTreeMap::new(),
                values: 0,
            }),
            gate: WriteGate::new(id),
        }
    }

    /// Numeric trace id, unique within the session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> TracerState {
        let inner = self.inner.lock();
        match inner.phase {
            Phase::Unstarted => TracerState::Unstarted,
            Phase::Active if inner.pause_depth > 0 => TracerState::Paused,
            Phase::Active => TracerState::Active,
            Phase::Finished => TracerState::Finished,
            Phase::Written => TracerState::Written,
        }
    }

    /// Move an unstarted tracer to `Active`. Returns whether it changed.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase == Phase::Unstarted {
            inner.phase = Phase::Active;
            true
        } else {
            false
        }
    }

    /// Enter a pause; returns the new depth.
    pub fn pause(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.pause_depth += 1;
        inner.pause_depth
    }

    /// Leave a pause; returns the remaining depth.
    pub fn unpause(&self) -> Result<u32> {
        let mut inner = self.inner.lock();
        if inner.pause_depth == 0 {
            return Err(Error::invalid_state(format!(
                "unpause without pause on thread {}",
                self.id
            )));
        }
        inner.pause_depth -= 1;
        Ok(inner.pause_depth)
    }

    /// Record `value` for `element`, creating its sequence on first use.
    ///
    /// Returns `Ok(false)` if the value was dropped because the tracer is
    /// not recording.
    pub fn trace(
        &self,
        element: ElementId,
        kind: SequenceKind,
        value: i64,
        factory: &CodecFactory,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Active || inner.pause_depth > 0 {
            return Ok(false);
        }
        let seq = match inner.sequences.entry(element) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => e.insert(factory.create(kind)?),
        };
        if seq.kind() != kind {
            return Err(Error::invalid_state(format!(
                "{} traced as {} but recorded as {}",
                element,
                kind,
                seq.kind()
            )));
        }
        seq.trace(value)?;
        inner.values += 1;
        Ok(true)
    }

    /// Finish every sequence. Later calls do nothing.
    ///
    /// Returns the sequences that failed; the others are finished.
    pub fn finish(&self) -> Vec<(ElementId, Error)> {
        let mut inner = self.inner.lock();
        Self::finish_locked(self.id, &mut inner)
    }

    fn finish_locked(id: u64, inner: &mut TracerInner) -> Vec<(ElementId, Error)> {
        if matches!(inner.phase, Phase::Finished | Phase::Written) {
            return Vec::new();
        }
        inner.phase = Phase::Finished;
        let mut failures = Vec::new();
        for (element, seq) in inner.sequences.iter_mut() {
            if let Err(e) = seq.finish() {
                warn!(
                    target: "tracestore::thread",
                    thread_id = id,
                    element = element.as_u32(),
                    error = %e,
                    "Failed to finish sequence"
                );
                failures.push((*element, e));
            }
        }
        debug!(
            target: "tracestore::thread",
            thread_id = id,
            sequences = inner.sequences.len(),
            values = inner.values,
            "Finished thread trace"
        );
        failures
    }

    /// Finish and hand the thread's records to `sink`, exactly once.
    ///
    /// Concurrent callers block until the first completes and then share
    /// its outcome. Failed sequences are reported in the snapshot and
    /// skipped; only `sink` errors fail the write-out.
    pub fn write_out<F>(&self, sink: F) -> Result<()>
    where
        F: FnOnce(ThreadSnapshot) -> Result<()>,
    {
        self.gate.run(|| {
            let mut inner = self.inner.lock();
            let mut failures = Self::finish_locked(self.id, &mut inner);

            let mut records = Vec::new();
            let mut record_count = 0u32;
            for (element, seq) in inner.sequences.iter_mut() {
                let mut record = Vec::new();
                match seq.write_out(&mut record) {
                    Ok(()) if record.is_empty() => {}
                    Ok(()) => {
                        records.extend_from_slice(&element.as_u32().to_le_bytes());
                        records.extend_from_slice(&record);
                        record_count += 1;
                    }
                    Err(e) => {
                        // Already reported by finish
                        if !failures.iter().any(|(id, _)| id == element) {
                            failures.push((*element, e));
                        }
                    }
                }
            }

            let snapshot = ThreadSnapshot {
                thread_id: self.id,
                name: self.name.clone(),
                record_count,
                records,
                values: inner.values,
                failures,
            };
            sink(snapshot)?;
            inner.phase = Phase::Written;
            debug!(
                target: "tracestore::thread",
                thread_id = self.id,
                records = record_count,
                "Wrote thread record"
            );
            Ok(())
        })
    }

    /// Whether the write-out has completed.
    pub fn is_written(&self) -> bool {
        self.gate.is_done()
    }

    /// Number of sequences created so far.
    pub fn sequence_count(&self) -> usize {
        self.inner.lock().sequences.len()
    }

    /// Number of values recorded so far.
    pub fn value_count(&self) -> u64 {
        self.inner.lock().values
    }
}

impl std::fmt::Debug for ThreadTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTracer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
