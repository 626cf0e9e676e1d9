//! Single-shot gate guarding a thread's write-out.
//!
//! ```text
//! Open ──run()──► Running ──► Done(outcome)
//!                    │
//!          concurrent run() calls block here
//!          and return the same outcome
//! ```

use parking_lot::{Condvar, Mutex};
use tracestore_core::{Error, Result};

#[derive(Debug, Clone)]
enum GateState {
    Open,
    Running,
    Done(std::result::Result<(), String>),
}

/// Runs a closure at most once, no matter how many threads trigger it.
///
/// The first caller runs the closure and gets its result unchanged. Every
/// other caller, concurrent or later, blocks until the first has finished
/// and then observes the same outcome; a failure is reported to them as
/// [`Error::WriteOutFailed`].
#[derive(Debug)]
pub struct WriteGate {
    owner: u64,
    state: Mutex<GateState>,
    done: Condvar,
}

impl WriteGate {
    /// Create an open gate for the thread with trace id `owner`.
    pub fn new(owner: u64) -> Self {
        WriteGate {
            owner,
            state: Mutex::new(GateState::Open),
            done: Condvar::new(),
        }
    }

    /// Run `f` if nobody has, otherwise wait for and return the outcome.
    pub fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        {
            let mut state = self.state.lock();
            loop {
                if let GateState::Done(outcome) = &*state {
                    return self.shared(outcome);
                }
                if matches!(*state, GateState::Open) {
                    *state = GateState::Running;
                    break;
                }
                self.done.wait(&mut state);
            }
        }

        let mut guard = RunGuard {
            gate: self,
            armed: true,
        };
        let result = f();
        guard.complete(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result
    }

    /// Whether the gated closure has completed (successfully or not).
    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock(), GateState::Done(_))
    }

    /// Outcome of a completed run, `None` while open or running.
    pub fn outcome(&self) -> Option<Result<()>> {
        match &*self.state.lock() {
            GateState::Done(outcome) => Some(self.shared(outcome)),
            _ => None,
        }
    }

    fn shared(&self, outcome: &std::result::Result<(), String>) -> Result<()> {
        outcome.clone().map_err(|message| Error::WriteOutFailed {
            thread_id: self.owner,
            message,
        })
    }

    fn finish(&self, outcome: std::result::Result<(), String>) {
        *self.state.lock() = GateState::Done(outcome);
        self.done.notify_all();
    }
}

/// Releases waiters even if the gated closure panics.
struct RunGuard<'a> {
    gate: &'a WriteGate,
    armed: bool,
}

impl RunGuard<'_> {
    fn complete(&mut self, outcome: std::result::Result<(), String>) {
        self.armed = false;
        self.gate.finish(outcome);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.finish(Err("write-out panicked".to_string()));
        }
    }
}
