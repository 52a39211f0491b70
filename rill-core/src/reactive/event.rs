//! Event Gates
//!
//! An event gate defers computation until an explicit trigger cell
//! advances. Changes to any other cell read inside the gated expression are
//! ignored: the body runs in an isolated frame, so those reads leave no
//! dependency behind.
//!
//! Two flavors:
//!
//! - [`EventObserver`]: a side-effecting handler run once per trigger
//!   advance. Its return value is discarded; it writes to the outside world
//!   through the injected [`OutputHandle`] rather than mutating shared
//!   state ambiently.
//!
//! - [`GatedDerived`]: a cached value whose recomputation is gated on the
//!   trigger. Strictly lazy: a trigger advance only arms the gate; the
//!   expression runs on the first read of the accessor afterwards, and a
//!   gate nobody reads never runs at all. Before the first trigger advance
//!   there is no value and reads return [`EvalError::AwaitingTrigger`].
//!
//! The gate watches its declared trigger and nothing else. Observed values
//! of non-trigger cells are whatever they hold at evaluation time, not at
//! registration time.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use super::context::{isolate, EvalScope};
use super::runtime::{Reactive, SessionRuntime};
use crate::error::EvalError;
use crate::graph::{NodeId, NodeKind};
use crate::output::OutputHandle;

/// A side-effecting handler gated on a trigger cell.
pub struct EventObserver {
    /// Unique identifier for this observer.
    id: NodeId,

    /// The trigger cell this observer watches.
    trigger: NodeId,

    /// The handler. Runs isolated; writes go through the output handle.
    handler: Box<dyn Fn(&OutputHandle) -> Result<(), EvalError> + Send + Sync>,

    /// Whether the observer has been disposed.
    disposed: AtomicBool,

    /// Number of times the handler has run.
    run_count: AtomicUsize,
}

impl EventObserver {
    pub(crate) fn new<F>(trigger: NodeId, handler: F) -> Arc<Self>
    where
        F: Fn(&OutputHandle) -> Result<(), EvalError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: NodeId::new(),
            trigger,
            handler: Box::new(handler),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        })
    }

    /// Get the observer's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The trigger cell this observer watches.
    pub fn trigger(&self) -> NodeId {
        self.trigger
    }

    /// Run the handler once for a trigger advance.
    ///
    /// The body executes in an isolated frame; a failure is reported to the
    /// session log and does not affect anything else.
    pub(crate) fn fire(&self, out: &OutputHandle) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        self.run_count.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = isolate(|| (self.handler)(out)) {
            error!(
                observer = self.id.raw(),
                error = %err,
                "event observer failed"
            );
        }
    }

    /// Dispose of the observer. After disposal, the handler never runs
    /// again.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Check if the observer has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the handler has run.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }
}

impl Debug for EventObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventObserver")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct GatedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Unique identifier; doubles as this node's id in the graph.
    id: NodeId,

    /// The trigger cell's version stamp.
    trigger_version: Arc<AtomicU64>,

    /// Trigger version consumed by the last successful evaluation.
    /// Initialized to the trigger's version at registration, so only
    /// advances *after* declaration arm the gate.
    seen: AtomicU64,

    /// The gated computation. Runs isolated.
    compute: Box<dyn Fn() -> Result<T, EvalError> + Send + Sync>,

    /// The cached value (None until the first post-trigger evaluation).
    value: RwLock<Option<T>>,

    /// Own version stamp, shared with the session's version table.
    version: Arc<AtomicU64>,

    /// Set while the expression is running; re-entry is a cycle.
    in_progress: AtomicBool,
}

impl<T> GatedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn ensure_fresh(&self) -> Result<(), EvalError> {
        let current = self.trigger_version.load(Ordering::SeqCst);
        if current > self.seen.load(Ordering::SeqCst) {
            return self.recompute(current);
        }
        if self.value.read().expect("value lock poisoned").is_some() {
            Ok(())
        } else {
            Err(EvalError::AwaitingTrigger)
        }
    }

    fn recompute(&self, trigger_version: u64) -> Result<(), EvalError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(EvalError::Cycle(self.id));
        }
        let _guard = InProgressReset(&self.in_progress);

        match isolate(|| (self.compute)()) {
            Ok(new_value) => {
                let changed = {
                    let current = self.value.read().expect("value lock poisoned");
                    current.as_ref() != Some(&new_value)
                };
                *self.value.write().expect("value lock poisoned") = Some(new_value);
                if changed {
                    self.version.fetch_add(1, Ordering::SeqCst);
                }
                // Consume the trigger advance only on success; a failed run
                // retries on the next read, still gated on the advance that
                // already happened.
                self.seen.store(trigger_version, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                warn!(node = self.id.raw(), error = %err, "gated evaluation failed");
                Err(err)
            }
        }
    }
}

struct InProgressReset<'a>(&'a AtomicBool);

impl Drop for InProgressReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T> Reactive for GatedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn mark_stale(&self) {
        // Staleness is the trigger-version comparison; there is no separate
        // flag to flip. The sweep still passes through this node so its
        // dependents get marked.
    }

    fn settle(&self) -> Result<(), EvalError> {
        self.ensure_fresh()
    }
}

/// A cached value recomputed only on trigger advances.
///
/// Cheap to clone; clones share the same cache and identity.
pub struct GatedDerived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<GatedInner<T>>,
}

impl<T> GatedDerived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub(crate) fn new<F>(
        runtime: &Arc<SessionRuntime>,
        trigger: NodeId,
        trigger_version: Arc<AtomicU64>,
        compute: F,
    ) -> Self
    where
        F: Fn() -> Result<T, EvalError> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let version = runtime.register_producer(id, NodeKind::Gated);
        let inner = Arc::new(GatedInner {
            id,
            seen: AtomicU64::new(trigger_version.load(Ordering::SeqCst)),
            trigger_version,
            compute: Box::new(compute),
            value: RwLock::new(None),
            version,
            in_progress: AtomicBool::new(false),
        });
        let reactive: Arc<dyn Reactive> = inner.clone();
        runtime.register_reactive(id, Arc::downgrade(&reactive));
        // The gate's only edge: its trigger. Inner reads are isolated and
        // never appear in the graph.
        runtime.add_static_edge(trigger, id);
        Self { inner }
    }

    /// Get the node's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the node's current version.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Whether a value has been computed since the first trigger advance.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().expect("value lock poisoned").is_some()
    }

    /// Read the gated value.
    ///
    /// If the trigger advanced since the last evaluation, the expression
    /// runs now (this read is the "first read after the trigger"). If the
    /// trigger never advanced, returns [`EvalError::AwaitingTrigger`].
    /// Otherwise returns the cached value. If called during a tracked
    /// evaluation, registers this node in the reader's dependency set.
    pub fn read(&self) -> Result<T, EvalError> {
        self.inner.ensure_fresh()?;
        EvalScope::record(self.inner.id, self.inner.version.load(Ordering::SeqCst));
        Ok(self
            .inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
            .expect("settled gate has a value"))
    }
}

impl<T> Clone for GatedDerived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for GatedDerived<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedDerived")
            .field("id", &self.inner.id)
            .field("has_value", &self.has_value())
            .finish()
    }
}
