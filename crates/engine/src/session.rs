//! Trace session: the write side of one trace file.
//!
//! A session owns the store, the codec factory, the thread registry and
//! the two metadata streams. Instrumentation calls [`TraceSession::trace`]
//! from any thread; [`TraceSession::finish`] flushes everything and closes
//! the file.
//!
//! ## Stream allocation
//!
//! ```text
//! stream 0  class catalogue   (gzip, written at finish)
//! stream 1  thread directory  (gzip, appended as threads are written)
//! stream 2  shared grammar    (sequitur sessions only, written at finish)
//! 3..       sequence streams  (uncompressed and gzip sessions)
//! ```
//!
//! ## Finish protocol
//!
//! 1. Stop accepting traces; later traces are dropped.
//! 2. Drain live, pending and concurrently registering threads; write each
//!    exactly once.
//! 3. Write the grammar, the directory and the catalogue.
//! 4. Close the store.

use crate::catalogue::{ClassCatalogue, ClassRecord};
use crate::config::TraceConfig;
use crate::directory::encode_snapshot;
use crate::metadata::MetadataStream;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracestore_codec::CodecFactory;
use tracestore_concurrency::{ThreadRegistry, ThreadSnapshot, ThreadTracer};
use tracestore_core::{ElementId, Error, FormatTag, Result, SequenceKind, StreamId};
use tracestore_storage::{StoreSummary, StreamStore, StreamWriter};
use tracing::{debug, error, info, warn};

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Codec used
    pub format: FormatTag,
    /// Threads written to the directory
    pub threads: u64,
    /// Registered classes
    pub classes: u64,
    /// Recovered errors during the session
    pub errors: u64,
    /// Message of the most recent error
    pub last_error: Option<String>,
    /// Store figures at close
    pub store: StoreSummary,
    debug: bool,
}

impl SessionSummary {
    /// Text for the end user, if there is anything to report.
    pub fn final_user_info(&self) -> Option<String> {
        let last = self.last_error.as_deref().unwrap_or("unknown");
        match self.errors {
            0 if self.debug => Some("DEBUG: trace written successfully".to_string()),
            0 => None,
            1 => Some(format!("There was an error while tracing: {}", last)),
            n => Some(format!(
                "There were several errors ({}) while tracing.\nLast error message: {}",
                n, last
            )),
        }
    }
}

#[derive(Debug, Default)]
struct ErrorLog {
    count: AtomicU64,
    last: Mutex<Option<String>>,
}

/// Streams owned by the session until finish.
struct MetadataStreams {
    catalogue: Option<StreamWriter>,
    directory: Option<MetadataStream>,
    grammar: Option<StreamWriter>,
}

enum FinishState {
    Running,
    Done(SessionSummary),
    Failed(String),
}

struct SessionInner {
    path: PathBuf,
    config: TraceConfig,
    format: FormatTag,
    store: StreamStore,
    factory: CodecFactory,
    registry: ThreadRegistry,
    elements: RwLock<Vec<SequenceKind>>,
    catalogue: ClassCatalogue,
    grammar_stream: Option<StreamId>,
    metadata: Mutex<MetadataStreams>,
    started: AtomicBool,
    finishing: AtomicBool,
    finish: Mutex<FinishState>,
    // Held shared by write-outs outside finish; finish takes it exclusively
    write_outs: RwLock<()>,
    threads_written: AtomicU64,
    errors: ErrorLog,
}

/// Handle to a trace session; clones share the session.
#[derive(Clone)]
pub struct TraceSession {
    inner: Arc<SessionInner>,
}

impl TraceSession {
    /// Create the trace file at `path` and reserve the metadata streams.
    ///
    /// Failure here is fatal to tracing.
    pub fn create<P: AsRef<Path>>(path: P, config: TraceConfig) -> Result<Self> {
        config.validate()?;
        let format = config.format_tag()?;
        let path = path.as_ref().to_path_buf();
        let store = StreamStore::create(&path, config.store_config())?;

        let catalogue = store.create_stream()?;
        let directory = store.create_stream()?;
        for (writer, expected) in [
            (&catalogue, StreamId::CATALOGUE),
            (&directory, StreamId::DIRECTORY),
        ] {
            if writer.id() != expected {
                return Err(Error::invalid_state(format!(
                    "metadata stream got {} instead of {}",
                    writer.id(),
                    expected
                )));
            }
        }

        let factory = CodecFactory::new(format, &store, config.gzip_level)?;
        let grammar = match format {
            FormatTag::Sequitur => Some(store.create_stream()?),
            _ => None,
        };
        let grammar_stream = grammar.as_ref().map(StreamWriter::id);

        info!(
            target: "tracestore::session",
            path = %path.display(),
            format = format.name(),
            deferred_start = config.deferred_start,
            "Trace session created"
        );

        Ok(TraceSession {
            inner: Arc::new(SessionInner {
                path,
                format,
                store,
                factory,
                registry: ThreadRegistry::new(),
                elements: RwLock::new(Vec::new()),
                catalogue: ClassCatalogue::new(),
                grammar_stream,
                metadata: Mutex::new(MetadataStreams {
                    catalogue: Some(catalogue),
                    directory: Some(MetadataStream::new(directory, config.gzip_level)),
                    grammar,
                }),
                started: AtomicBool::new(!config.deferred_start),
                finishing: AtomicBool::new(false),
                finish: Mutex::new(FinishState::Running),
                write_outs: RwLock::new(()),
                threads_written: AtomicU64::new(0),
                errors: ErrorLog::default(),
                config,
            }),
        })
    }

    /// Path of the trace file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Codec of this session.
    pub fn format(&self) -> FormatTag {
        self.inner.format
    }

    /// Session configuration.
    pub fn config(&self) -> &TraceConfig {
        &self.inner.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a traced element and return its dense id.
    pub fn register_sequence(&self, kind: SequenceKind) -> ElementId {
        let mut elements = self.inner.elements.write();
        let id = ElementId(elements.len() as u32);
        elements.push(kind);
        id
    }

    /// Kind an element was registered with.
    pub fn element_kind(&self, element: ElementId) -> Option<SequenceKind> {
        self.inner.elements.read().get(element.index()).copied()
    }

    /// Number of registered elements.
    pub fn element_count(&self) -> usize {
        self.inner.elements.read().len()
    }

    /// Register an instrumented class, reserving its instruction indices.
    pub fn register_class(
        &self,
        name: impl Into<String>,
        access_flags: u32,
        instruction_count: u32,
    ) -> Result<ClassRecord> {
        if self.is_finishing() {
            return Err(Error::invalid_state("class registered after session finish"));
        }
        let record = self
            .inner
            .catalogue
            .register(name, access_flags, instruction_count)?;
        debug!(
            target: "tracestore::session",
            class = %record.name,
            first = record.first_instruction,
            end = record.end_instruction,
            "Registered class"
        );
        Ok(record)
    }

    // ========================================================================
    // Tracing
    // ========================================================================

    /// Record `value` for `element` in the calling thread.
    ///
    /// Never fails: values arriving after finish began are dropped, and
    /// per-element failures are counted and logged.
    pub fn trace(&self, element: ElementId, value: i64) {
        if self.is_finishing() {
            return;
        }
        let kind = match self.element_kind(element) {
            Some(kind) => kind,
            None => {
                self.record_error(&Error::invalid_state(format!(
                    "trace of unregistered {}",
                    element
                )));
                return;
            }
        };
        let tracer = match self.current_tracer() {
            Some(tracer) => tracer,
            None => return,
        };
        if let Err(e) = tracer.trace(element, kind, value, &self.inner.factory) {
            self.record_error(&e);
        }
    }

    /// Pause tracing in the calling thread; pauses nest.
    pub fn pause(&self) -> u32 {
        self.current_tracer().map_or(0, |t| t.pause())
    }

    /// Undo one [`pause`](Self::pause) in the calling thread.
    pub fn unpause(&self) -> Result<u32> {
        match self.current_tracer() {
            Some(tracer) => tracer.unpause(),
            None => Ok(0),
        }
    }

    /// Start every thread of a session created with `deferred_start`.
    pub fn start_tracing(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let started = self
            .inner
            .registry
            .live_tracers()
            .iter()
            .filter(|t| t.start())
            .count();
        info!(target: "tracestore::session", threads = started, "Tracing started");
    }

    /// Whether tracing has been started.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// The calling thread is about to exit: write its trace now.
    pub fn thread_exits(&self) {
        let _guard = self.inner.write_outs.read();
        if let Some(tracer) = self.inner.registry.remove_current() {
            // Failures are already logged and counted
            let _ = self.write_thread(&tracer);
        }
    }

    /// Never trace the calling thread again.
    ///
    /// For threads internal to the tracing machinery. Values it traced
    /// before are written out now.
    pub fn exclude_current_thread(&self) {
        let _guard = self.inner.write_outs.read();
        if let Some(tracer) = self.inner.registry.exclude_current() {
            let _ = self.write_thread(&tracer);
        }
    }

    fn current_tracer(&self) -> Option<Arc<ThreadTracer>> {
        let started = self.is_started();
        let (tracer, created) = self.inner.registry.current(started)?;
        if created {
            // start_tracing may have missed the entry while it registered
            if !started && self.is_started() {
                tracer.start();
            }
            self.write_ready_threads();
        }
        Some(tracer)
    }

    /// Write out threads whose owner went away without an exit call.
    fn write_ready_threads(&self) {
        let _guard = self.inner.write_outs.read();
        self.inner.registry.collect_stale();
        for tracer in self.inner.registry.take_pending() {
            let _ = self.write_thread(&tracer);
        }
    }

    fn write_thread(&self, tracer: &ThreadTracer) -> Result<()> {
        let result = tracer.write_out(|snapshot| self.append_directory(snapshot));
        if let Err(e) = &result {
            // Waiters observe WriteOutFailed; count the failure once
            if !matches!(e, Error::WriteOutFailed { .. }) {
                error!(
                    target: "tracestore::session",
                    thread_id = tracer.id(),
                    error = %e,
                    "Thread write-out failed"
                );
                self.record_error(e);
            }
        }
        result
    }

    fn append_directory(&self, snapshot: ThreadSnapshot) -> Result<()> {
        for (element, e) in &snapshot.failures {
            warn!(
                target: "tracestore::session",
                thread_id = snapshot.thread_id,
                element = element.as_u32(),
                error = %e,
                "Dropped unfinished sequence"
            );
            self.record_error(e);
        }
        let record = encode_snapshot(self.inner.format, self.inner.grammar_stream, &snapshot)?;
        let mut metadata = self.inner.metadata.lock();
        let directory = metadata
            .directory
            .as_mut()
            .ok_or_else(|| Error::invalid_state("thread directory already closed"))?;
        directory.append(&record)?;
        self.inner.threads_written.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "tracestore::session",
            thread_id = snapshot.thread_id,
            name = %snapshot.name,
            sequences = snapshot.record_count,
            values = snapshot.values,
            "Thread written"
        );
        Ok(())
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Count a recovered error and remember its message.
    pub fn record_error(&self, e: &Error) {
        warn!(target: "tracestore::session", error = %e, "Error while tracing");
        self.inner.errors.count.fetch_add(1, Ordering::Relaxed);
        *self.inner.errors.last.lock() = Some(e.to_string());
    }

    /// Number of errors recorded so far.
    pub fn error_count(&self) -> u64 {
        self.inner.errors.count.load(Ordering::Relaxed)
    }

    /// Most recent error message.
    pub fn last_error(&self) -> Option<String> {
        self.inner.errors.last.lock().clone()
    }

    // ========================================================================
    // Finish
    // ========================================================================

    /// Whether finish has begun.
    pub fn is_finishing(&self) -> bool {
        self.inner.finishing.load(Ordering::SeqCst)
    }

    /// Write every thread, the metadata streams, and close the file.
    ///
    /// Idempotent: later calls return the first summary. Errors writing the
    /// metadata or closing the store are returned; per-thread errors are
    /// only counted.
    pub fn finish(&self) -> Result<SessionSummary> {
        let mut state = self.inner.finish.lock();
        match &*state {
            FinishState::Done(summary) => return Ok(summary.clone()),
            FinishState::Failed(message) => {
                return Err(Error::invalid_state(format!(
                    "session finish already failed: {}",
                    message
                )))
            }
            FinishState::Running => {}
        }
        self.inner.finishing.store(true, Ordering::SeqCst);
        // Wait for write-outs that already took their tracer off the registry
        let _quiesced = self.inner.write_outs.write();

        match self.finish_inner() {
            Ok(summary) => {
                *state = FinishState::Done(summary.clone());
                Ok(summary)
            }
            Err(e) => {
                error!(target: "tracestore::session", error = %e, "Session finish failed");
                *state = FinishState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn finish_inner(&self) -> Result<SessionSummary> {
        let tracers = self.inner.registry.drain_all();
        debug!(
            target: "tracestore::session",
            threads = tracers.len(),
            "Writing remaining threads"
        );
        for tracer in &tracers {
            let _ = self.write_thread(tracer);
        }

        let level = self.inner.config.gzip_level;
        let mut metadata = self.inner.metadata.lock();

        if let (Some(grammar), Some(mut writer)) =
            (self.inner.factory.grammar(), metadata.grammar.take())
        {
            let stats = grammar.stats();
            writer.write_bytes(&grammar.encode(level)?)?;
            writer.close()?;
            if self.inner.config.debug {
                info!(
                    target: "tracestore::session",
                    values = stats.len,
                    rules = stats.rules,
                    symbols = stats.symbols,
                    "Grammar statistics"
                );
            }
        }

        let threads = match metadata.directory.take() {
            Some(directory) => directory.finish()?,
            None => return Err(Error::invalid_state("thread directory already closed")),
        };

        let catalogue_writer = metadata
            .catalogue
            .take()
            .ok_or_else(|| Error::invalid_state("class catalogue already closed"))?;
        let mut catalogue = MetadataStream::new(catalogue_writer, level);
        for record in self.inner.catalogue.drain() {
            catalogue.append(&record.encode()?)?;
        }
        debug_assert_eq!(catalogue.id(), StreamId::CATALOGUE);
        let classes = catalogue.finish()?;
        drop(metadata);

        let store = self.inner.store.close()?;
        let summary = SessionSummary {
            format: self.inner.format,
            threads,
            classes,
            errors: self.error_count(),
            last_error: self.last_error(),
            store,
            debug: self.inner.config.debug,
        };
        info!(
            target: "tracestore::session",
            path = %self.inner.path.display(),
            threads = summary.threads,
            classes = summary.classes,
            errors = summary.errors,
            blocks = summary.store.total_blocks,
            "Trace session finished"
        );
        Ok(summary)
    }

    /// Live registry, for inspection.
    pub fn registry(&self) -> &ThreadRegistry {
        &self.inner.registry
    }
}

impl std::fmt::Debug for TraceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSession")
            .field("path", &self.inner.path)
            .field("format", &self.inner.format)
            .field("finishing", &self.is_finishing())
            .finish()
    }
}
