//! Sessions
//!
//! A session is one isolated instance of the full reactive graph, one per
//! connected user. It owns its cells, nodes, bindings, and sink; nothing is
//! shared between sessions. The session is also the declaration API the
//! application layer builds its UI logic against.
//!
//! All entities declared through a session live until the session is torn
//! down (the connection closes).

mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

pub use registry::SessionRegistry;

use crate::error::EvalError;
use crate::output::{OutputHandle, OutputSink, SinkValue};
use crate::reactive::{
    Derived, EventObserver, GatedDerived, SessionRuntime, ValueCell,
};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One user's reactive graph and the API for declaring things in it.
///
/// Cheap to clone; clones refer to the same session.
pub struct Session {
    id: SessionId,
    runtime: Arc<SessionRuntime>,
}

impl Session {
    /// Create a session writing its outputs to the given sink.
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        let id = SessionId::new();
        debug!(session = id.raw(), "session created");
        Self {
            id,
            runtime: SessionRuntime::new(sink),
        }
    }

    /// Get the session's unique ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Declare a value cell.
    pub fn cell<T>(&self, initial: T) -> ValueCell<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ValueCell::new(&self.runtime, initial)
    }

    /// Declare a named input cell.
    ///
    /// The name is the identifier an input widget declares. Names must be
    /// unique within a session; re-declaring one rebinds it (last wins).
    pub fn input<T>(&self, name: impl Into<String>, initial: T) -> ValueCell<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = self.cell(initial);
        self.runtime.declare_input(name.into(), cell.id());
        cell
    }

    /// Declared input names, in declaration order.
    pub fn input_names(&self) -> Vec<String> {
        self.runtime.input_names()
    }

    /// Whether a name currently addresses the given cell.
    pub fn is_input<T>(&self, name: &str, cell: &ValueCell<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.runtime.input_id(name) == Some(cell.id())
    }

    /// Declare a derived node over an infallible expression.
    pub fn derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Derived::new(&self.runtime, compute)
    }

    /// Declare a derived node over a fallible expression.
    pub fn try_derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn() -> Result<T, EvalError> + Send + Sync + 'static,
    {
        Derived::try_new(&self.runtime, compute)
    }

    /// Register a side-effecting handler run once per advance of the
    /// trigger cell.
    ///
    /// The handler body is isolated: cells it reads are observed at
    /// evaluation time and never gate re-execution. Output goes through the
    /// injected handle. The observer lives for the session; use
    /// [`EventObserver::dispose`] to stop it earlier.
    pub fn observe_event<U, F>(&self, trigger: &ValueCell<U>, handler: F) -> Arc<EventObserver>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&OutputHandle) -> Result<(), EvalError> + Send + Sync + 'static,
    {
        let observer = EventObserver::new(trigger.id(), handler);
        self.runtime.add_observer(Arc::clone(&observer));
        observer
    }

    /// Declare a derived node whose cached value updates only on advances
    /// of the trigger cell.
    ///
    /// Strictly lazy: the expression runs on the first read after an
    /// advance, never at trigger time. Reads before the first advance
    /// return [`EvalError::AwaitingTrigger`].
    pub fn event_derived<U, T, F>(&self, trigger: &ValueCell<U>, compute: F) -> GatedDerived<T>
    where
        U: Clone + Send + Sync + 'static,
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn() -> Result<T, EvalError> + Send + Sync + 'static,
    {
        GatedDerived::new(
            &self.runtime,
            trigger.id(),
            trigger.version_handle(),
            compute,
        )
    }

    /// Bind an expression to a named output sink.
    ///
    /// The expression is wrapped in an implicit derived node and its
    /// initial value is pushed immediately. Binding an already-bound name
    /// replaces the previous owner (last declaration wins).
    pub fn bind<F>(&self, name: impl Into<String>, expr: F)
    where
        F: Fn() -> Result<SinkValue, EvalError> + Send + Sync + 'static,
    {
        let name = name.into();
        let node = Derived::try_new(&self.runtime, expr);
        self.runtime
            .bind(name.clone(), Arc::new(crate::output::OutputBinding::new(name, node)));
    }

    /// Remove a binding. Returns false if the name was not bound.
    pub fn unbind(&self, name: &str) -> bool {
        self.runtime.unbind(name)
    }

    /// A write handle for this session's sink.
    pub fn output_handle(&self) -> OutputHandle {
        OutputHandle::new(self.runtime.sink())
    }

    /// Number of nodes in this session's dependency graph.
    pub fn node_count(&self) -> usize {
        self.runtime.node_count()
    }

    /// Number of edges in this session's dependency graph.
    pub fn edge_count(&self) -> usize {
        self.runtime.edge_count()
    }

    /// Number of installed output bindings.
    pub fn binding_count(&self) -> usize {
        self.runtime.binding_count()
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("nodes", &self.node_count())
            .field("bindings", &self.binding_count())
            .finish()
    }
}
