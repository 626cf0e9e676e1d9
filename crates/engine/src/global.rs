//! Process-wide session for instrumentation hooks.
//!
//! Instrumented code has no handle to pass around; it calls these free
//! functions, which forward to the installed session. Without one they do
//! nothing.

use crate::session::{SessionSummary, TraceSession};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracestore_core::{ElementId, Error, Result};

static CURRENT: Lazy<RwLock<Option<TraceSession>>> = Lazy::new(|| RwLock::new(None));

/// Install `session` as the process-wide session.
///
/// Fails if another session is installed and not yet finished.
pub fn install(session: TraceSession) -> Result<()> {
    let mut current = CURRENT.write();
    if let Some(existing) = current.as_ref() {
        if !existing.is_finishing() {
            return Err(Error::invalid_state(format!(
                "a trace session is already installed for {}",
                existing.path().display()
            )));
        }
    }
    *current = Some(session);
    Ok(())
}

/// The installed session.
pub fn current() -> Option<TraceSession> {
    CURRENT.read().clone()
}

/// Forward to [`TraceSession::trace`].
pub fn trace(element: ElementId, value: i64) {
    if let Some(session) = CURRENT.read().as_ref() {
        session.trace(element, value);
    }
}

/// Forward to [`TraceSession::thread_exits`].
pub fn thread_exits() {
    if let Some(session) = current() {
        session.thread_exits();
    }
}

/// Forward to [`TraceSession::exclude_current_thread`].
pub fn exclude_current_thread() {
    if let Some(session) = current() {
        session.exclude_current_thread();
    }
}

/// Finish and uninstall the session. `Ok(None)` if none was installed.
pub fn finish() -> Result<Option<SessionSummary>> {
    let session = CURRENT.write().take();
    session.map(|s| s.finish()).transpose()
}
