//! Registry of per-thread tracers.
//!
//! Entries are keyed by [`ThreadId`]. Each registering thread also receives
//! an owner token in thread-local storage; when the thread dies without
//! announcing its exit, the token's destructor moves the entry to the
//! pending queue so that it is still finished and written. The token holds
//! the only strong reference to a liveness marker, which
//! [`ThreadRegistry::collect_stale`] probes for threads whose thread-local
//! destructors never ran.
//!
//! Once [`ThreadRegistry::drain_all`] has been called the registry is
//! closed and hands out no new tracers.

use crate::tracer::ThreadTracer;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

struct LiveEntry {
    tracer: Arc<ThreadTracer>,
    alive: Weak<()>,
}

struct RegistryInner {
    live: DashMap<ThreadId, LiveEntry>,
    excluded: DashSet<ThreadId>,
    pending: Mutex<Vec<Arc<ThreadTracer>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RegistryInner {
    // Lock order: `pending`, then a `live` shard. Moving an entry from
    // `live` to `pending` happens entirely under the `pending` lock.
    fn evict(&self, thread: ThreadId) {
        self.excluded.remove(&thread);
        let mut pending = self.pending.lock();
        if let Some((_, entry)) = self.live.remove(&thread) {
            warn!(
                target: "tracestore::thread",
                thread_id = entry.tracer.id(),
                name = entry.tracer.name(),
                "Thread ended without exit notification, queued for write-out"
            );
            pending.push(entry.tracer);
        }
    }
}

struct OwnerToken {
    registry: Weak<RegistryInner>,
    thread: ThreadId,
    _alive: Arc<()>,
}

impl Drop for OwnerToken {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.evict(self.thread);
        }
    }
}

thread_local! {
    static OWNER_TOKENS: RefCell<Vec<OwnerToken>> = RefCell::new(Vec::new());
}

/// Thread-safe map from live threads to their tracers.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct ThreadRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    /// Create an empty, open registry.
    pub fn new() -> Self {
        ThreadRegistry {
            inner: Arc::new(RegistryInner {
                live: DashMap::new(),
                excluded: DashSet::new(),
                pending: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Tracer of the calling thread, registering it on first use.
    ///
    /// New tracers start `Active` if `started`, else `Unstarted`. Returns
    /// the tracer and whether it was just created, or `None` once the
    /// registry is closed or the thread is excluded.
    pub fn current(&self, started: bool) -> Option<(Arc<ThreadTracer>, bool)> {
        if self.is_closed() {
            return None;
        }
        let me = thread::current();
        let thread = me.id();
        if self.inner.excluded.contains(&thread) {
            return None;
        }
        if let Some(entry) = self.inner.live.get(&thread) {
            return Some((Arc::clone(&entry.tracer), false));
        }

        let trace_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = me
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("thread-{}", trace_id));
        let tracer = Arc::new(ThreadTracer::new(trace_id, name, started));

        let alive = Arc::new(());
        let token = self.owner_token(thread, &alive);
        self.inner.live.insert(
            thread,
            LiveEntry {
                tracer: Arc::clone(&tracer),
                alive: Arc::downgrade(&alive),
            },
        );
        drop(alive);

        // During thread-local teardown the token is dropped unstored, which
        // queues the entry immediately.
        let _ = OWNER_TOKENS.try_with(|tokens| tokens.borrow_mut().push(token));

        // A drain that started after the insert owns the entry now
        if self.is_closed() {
            self.inner.live.remove(&thread);
            return None;
        }

        debug!(
            target: "tracestore::thread",
            thread_id = trace_id,
            name = tracer.name(),
            started,
            "Registered thread"
        );
        Some((tracer, true))
    }

    fn owner_token(&self, thread: ThreadId, alive: &Arc<()>) -> OwnerToken {
        OwnerToken {
            registry: Arc::downgrade(&self.inner),
            thread,
            _alive: Arc::clone(alive),
        }
    }

    /// Stop tracing the calling thread for the rest of its life.
    ///
    /// Later [`current`](Self::current) calls from this thread return
    /// `None`. A tracer the thread already had is unregistered and returned
    /// so that the caller can write it out.
    pub fn exclude_current(&self) -> Option<Arc<ThreadTracer>> {
        let thread = thread::current().id();
        let removed = self.remove_current();
        if self.inner.excluded.insert(thread) {
            // The mark goes away with the thread
            let token = self.owner_token(thread, &Arc::new(()));
            let _ = OWNER_TOKENS.try_with(|tokens| tokens.borrow_mut().push(token));
            debug!(target: "tracestore::thread", "Excluded thread from tracing");
        }
        removed
    }

    /// Whether the calling thread is excluded from tracing.
    pub fn is_current_excluded(&self) -> bool {
        self.inner.excluded.contains(&thread::current().id())
    }

    /// Tracer of the calling thread if it is registered.
    pub fn get_current(&self) -> Option<Arc<ThreadTracer>> {
        self.inner
            .live
            .get(&thread::current().id())
            .map(|entry| Arc::clone(&entry.tracer))
    }

    /// Unregister the calling thread, returning its tracer.
    pub fn remove_current(&self) -> Option<Arc<ThreadTracer>> {
        let thread = thread::current().id();
        let (_, removed) = self.inner.live.remove(&thread)?;
        let token = OWNER_TOKENS
            .try_with(|tokens| {
                let mut tokens = tokens.borrow_mut();
                let pos = tokens.iter().position(|t| {
                    t.thread == thread && Weak::ptr_eq(&t.registry, &Arc::downgrade(&self.inner))
                });
                pos.map(|p| tokens.swap_remove(p))
            })
            .ok()
            .flatten();
        // Entry is already gone, so the token's eviction is a no-op
        drop(token);
        Some(removed.tracer)
    }

    /// Move entries whose owning thread is gone to the pending queue.
    ///
    /// Returns how many were moved.
    pub fn collect_stale(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let before = pending.len();
        self.inner.live.retain(|_, entry| {
            if entry.alive.strong_count() == 0 {
                pending.push(Arc::clone(&entry.tracer));
                false
            } else {
                true
            }
        });
        let moved = pending.len() - before;
        if moved > 0 {
            debug!(target: "tracestore::thread", moved, "Collected stale thread entries");
        }
        moved
    }

    /// Take every queued tracer.
    pub fn take_pending(&self) -> Vec<Arc<ThreadTracer>> {
        std::mem::take(&mut *self.inner.pending.lock())
    }

    /// Close the registry and take every tracer it still holds.
    ///
    /// Evictions racing the drain either land in the result or find their
    /// entry already taken.
    pub fn drain_all(&self) -> Vec<Arc<ThreadTracer>> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut pending = self.inner.pending.lock();
        let keys: Vec<ThreadId> = self.inner.live.iter().map(|e| *e.key()).collect();
        let mut all = Vec::with_capacity(keys.len() + pending.len());
        for key in keys {
            if let Some((_, entry)) = self.inner.live.remove(&key) {
                all.push(entry.tracer);
            }
        }
        all.append(&mut pending);
        drop(pending);
        all.sort_by_key(|t| t.id());
        all
    }

    /// Whether [`drain_all`](Self::drain_all) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of registered threads.
    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Number of queued tracers.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Snapshot of the registered tracers.
    pub fn live_tracers(&self) -> Vec<Arc<ThreadTracer>> {
        self.inner
            .live
            .iter()
            .map(|e| Arc::clone(&e.value().tracer))
            .collect()
    }

    /// Number of tracers handed out so far.
    pub fn registered_total(&self) -> u64 {
        self.inner.next_id.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("live", &self.live_count())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
