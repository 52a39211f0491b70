//! Session Runtime
//!
//! The runtime is the per-session coordinator that connects cells, derived
//! nodes, event gates, and output bindings. It owns the dependency graph,
//! the version table, and the sink, and it drives the single evaluation
//! pass that follows every input change.
//!
//! # How It Works
//!
//! 1. Every producer (cell, derived node, gate) registers a graph node and
//!    a version stamp at declaration time.
//!
//! 2. Re-evaluable nodes additionally register a weak handle so the
//!    invalidation sweep can mark them stale without keeping them alive.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Asks the scheduler for the transitive dependent set (topological
//!       order) and marks each node stale
//!    b. Fires event observers gated on that cell
//!    c. Refreshes output bindings in declaration order
//!
//!    Stale nodes recompute lazily, pulled by reads during (c) or by
//!    application code; a node shared by several outputs settles once and
//!    serves the rest from cache.
//!
//! # Locking
//!
//! One evaluation pass runs to completion before the next external event is
//! processed (sessions are single-threaded cooperatively). No runtime lock
//! is ever held while user expressions run, so an expression is free to
//! read nodes, or even set a cell, which nests a complete pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::event::EventObserver;
use crate::error::EvalError;
use crate::graph::{InvalidationScheduler, NodeId, NodeKind};
use crate::output::{OutputBinding, OutputHandle, OutputSink, SinkUpdate};

/// A node the invalidation sweep can mark and the verify step can settle.
pub trait Reactive: Send + Sync {
    /// The node's id in the dependency graph.
    fn node_id(&self) -> NodeId;

    /// Mark this node as potentially needing recomputation.
    fn mark_stale(&self);

    /// Bring the node's cached value up to date if it is re-evaluable.
    fn settle(&self) -> Result<(), EvalError>;
}

/// The per-session reactive runtime.
///
/// Reactive objects hold this via `Weak`, so tearing down a session frees
/// the whole graph even while application code still holds cells or nodes.
pub struct SessionRuntime {
    /// The dependency graph and propagation-order logic.
    scheduler: RwLock<InvalidationScheduler>,

    /// Re-evaluable nodes, by id. Weak so the registry never keeps a node
    /// alive on its own.
    registry: RwLock<HashMap<NodeId, Weak<dyn Reactive>>>,

    /// Current version of every producer, by id.
    versions: RwLock<HashMap<NodeId, Arc<AtomicU64>>>,

    /// Output bindings in declaration order. Refresh order is part of the
    /// observable contract.
    bindings: RwLock<IndexMap<String, Arc<OutputBinding>>>,

    /// Event observers, keyed by their trigger cell.
    observers: RwLock<HashMap<NodeId, Vec<Arc<EventObserver>>>>,

    /// Declared input identifiers, in declaration order.
    inputs: RwLock<IndexMap<String, NodeId>>,

    /// Where output values land.
    sink: Arc<dyn OutputSink>,
}

impl SessionRuntime {
    pub(crate) fn new(sink: Arc<dyn OutputSink>) -> Arc<Self> {
        Arc::new(Self {
            scheduler: RwLock::new(InvalidationScheduler::new()),
            registry: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            bindings: RwLock::new(IndexMap::new()),
            observers: RwLock::new(HashMap::new()),
            inputs: RwLock::new(IndexMap::new()),
            sink,
        })
    }

    /// Register a producer: a graph node plus a version stamp.
    ///
    /// Returns the version handle shared between the producer and the
    /// runtime's version table.
    pub(crate) fn register_producer(&self, id: NodeId, kind: NodeKind) -> Arc<AtomicU64> {
        self.scheduler.write().add_node(id, kind);
        let version = Arc::new(AtomicU64::new(0));
        self.versions.write().insert(id, Arc::clone(&version));
        version
    }

    /// Register a re-evaluable node with the sweep/settle registry.
    pub(crate) fn register_reactive(&self, id: NodeId, reactive: Weak<dyn Reactive>) {
        self.registry.write().insert(id, reactive);
    }

    /// Remove a node from the registry, version table, and graph.
    pub(crate) fn unregister(&self, id: NodeId) {
        self.registry.write().remove(&id);
        self.versions.write().remove(&id);
        self.scheduler.write().remove_node(id);
    }

    /// Current version of a producer, if it is still registered.
    pub(crate) fn version_of(&self, id: NodeId) -> Option<u64> {
        self.versions
            .read()
            .get(&id)
            .map(|v| v.load(Ordering::SeqCst))
    }

    /// Settle a producer: bring its cached value up to date if it is
    /// re-evaluable, trivially Ok for plain cells.
    pub(crate) fn settle(&self, id: NodeId) -> Result<(), EvalError> {
        let reactive = {
            let registry = self.registry.read();
            registry.get(&id).and_then(Weak::upgrade)
        };
        match reactive {
            Some(reactive) => reactive.settle(),
            None => Ok(()),
        }
    }

    /// Replace a consumer's in-edges with its latest read set.
    pub(crate) fn set_dependencies(&self, consumer: NodeId, deps: &[NodeId]) {
        self.scheduler.write().set_dependencies(consumer, deps);
    }

    /// Add a permanent edge (an event gate's trigger).
    pub(crate) fn add_static_edge(&self, producer: NodeId, consumer: NodeId) {
        self.scheduler.write().add_edge(producer, consumer);
    }

    /// The evaluation pass that follows a cell change.
    pub(crate) fn cell_changed(&self, id: NodeId) {
        let affected = {
            let scheduler = self.scheduler.read();
            scheduler.mark_changed(id)
        };
        debug!(cell = id.raw(), affected = affected.len(), "input change");

        // Upgrade before marking so no lock is held while touching nodes.
        let reactives: Vec<Arc<dyn Reactive>> = {
            let registry = self.registry.read();
            affected
                .iter()
                .filter_map(|node_id| registry.get(node_id).and_then(Weak::upgrade))
                .collect()
        };
        for reactive in &reactives {
            reactive.mark_stale();
        }

        let observers: Vec<Arc<EventObserver>> = {
            let observers = self.observers.read();
            observers.get(&id).cloned().unwrap_or_default()
        };
        if !observers.is_empty() {
            let handle = OutputHandle::new(Arc::clone(&self.sink));
            for observer in &observers {
                observer.fire(&handle);
            }
        }

        self.refresh_bindings();
    }

    /// Register an event observer for its trigger cell.
    pub(crate) fn add_observer(&self, observer: Arc<EventObserver>) {
        self.observers
            .write()
            .entry(observer.trigger())
            .or_default()
            .push(observer);
    }

    /// Install (or replace) an output binding and push its initial value.
    pub(crate) fn bind(&self, name: String, binding: Arc<OutputBinding>) {
        let replaced = {
            let mut bindings = self.bindings.write();
            bindings.insert(name.clone(), Arc::clone(&binding))
        };
        if let Some(old) = replaced {
            debug!(sink = %name, "output sink rebound; previous owner replaced");
            self.unregister(old.node_id());
        }
        self.refresh_binding(&binding);
    }

    /// Remove a binding. Returns false if the name was not bound.
    pub(crate) fn unbind(&self, name: &str) -> bool {
        let removed = self.bindings.write().shift_remove(name);
        match removed {
            Some(binding) => {
                self.unregister(binding.node_id());
                true
            }
            None => false,
        }
    }

    /// Refresh every binding, in declaration order. Only sinks whose value
    /// actually changed receive a push.
    fn refresh_bindings(&self) {
        let entries: Vec<Arc<OutputBinding>> = {
            let bindings = self.bindings.read();
            bindings.values().cloned().collect()
        };
        for binding in &entries {
            self.refresh_binding(binding);
        }
    }

    fn refresh_binding(&self, binding: &OutputBinding) {
        match binding.ensure_fresh() {
            Ok(()) => {
                if let Some(value) = binding.take_unpushed() {
                    self.sink.receive(binding.name(), SinkUpdate::Value(value));
                }
            }
            // A gate that has not fired yet has nothing to show; the sink
            // stays as it is.
            Err(EvalError::AwaitingTrigger) => {}
            Err(err) => {
                warn!(sink = binding.name(), error = %err, "output refresh failed");
                binding.note_error();
                self.sink
                    .receive(binding.name(), SinkUpdate::Error(err.to_string()));
            }
        }
    }

    /// Declare (or re-declare) a named input identifier.
    pub(crate) fn declare_input(&self, name: String, id: NodeId) {
        let mut inputs = self.inputs.write();
        if let Some(old) = inputs.insert(name.clone(), id) {
            debug!(input = %name, old = old.raw(), "input identifier re-declared; last wins");
        }
    }

    /// Declared input identifiers, in declaration order.
    pub(crate) fn input_names(&self) -> Vec<String> {
        self.inputs.read().keys().cloned().collect()
    }

    /// The cell currently declared under an input identifier.
    pub(crate) fn input_id(&self, name: &str) -> Option<NodeId> {
        self.inputs.read().get(name).copied()
    }

    /// The session's output sink.
    pub(crate) fn sink(&self) -> Arc<dyn OutputSink> {
        Arc::clone(&self.sink)
    }

    /// Number of nodes in the dependency graph.
    pub(crate) fn node_count(&self) -> usize {
        self.scheduler.read().node_count()
    }

    /// Number of edges in the dependency graph.
    pub(crate) fn edge_count(&self) -> usize {
        self.scheduler.read().edge_count()
    }

    /// Number of installed output bindings.
    pub(crate) fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    use super::*;
    use crate::output::MemorySink;

    struct MockReactive {
        id: NodeId,
        stale: AtomicBool,
        settled: AtomicI32,
    }

    impl MockReactive {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(),
                stale: AtomicBool::new(false),
                settled: AtomicI32::new(0),
            })
        }
    }

    impl Reactive for MockReactive {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn mark_stale(&self) {
            self.stale.store(true, Ordering::SeqCst);
        }

        fn settle(&self) -> Result<(), EvalError> {
            self.settled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runtime() -> Arc<SessionRuntime> {
        SessionRuntime::new(Arc::new(MemorySink::new()))
    }

    #[test]
    fn producers_register_with_version_zero() {
        let runtime = runtime();
        let id = NodeId::new();

        let version = runtime.register_producer(id, NodeKind::Source);
        assert_eq!(runtime.version_of(id), Some(0));

        version.fetch_add(1, Ordering::SeqCst);
        assert_eq!(runtime.version_of(id), Some(1));

        assert_eq!(runtime.version_of(NodeId::new()), None);
    }

    #[test]
    fn sweep_marks_registered_dependents() {
        let runtime = runtime();
        let source = NodeId::new();
        runtime.register_producer(source, NodeKind::Source);

        let reactive = MockReactive::new();
        runtime.register_producer(reactive.id, NodeKind::Derived);
        runtime.register_reactive(
            reactive.id,
            Arc::downgrade(&(reactive.clone() as Arc<dyn Reactive>)),
        );
        runtime.set_dependencies(reactive.id, &[source]);

        runtime.cell_changed(source);
        assert!(reactive.stale.load(Ordering::SeqCst));
    }

    #[test]
    fn settle_is_trivial_for_unregistered_producers() {
        let runtime = runtime();
        let source = NodeId::new();
        runtime.register_producer(source, NodeKind::Source);

        // Cells have no registry entry; settling them is a no-op.
        assert!(runtime.settle(source).is_ok());
    }

    #[test]
    fn settle_reaches_registered_nodes() {
        let runtime = runtime();
        let reactive = MockReactive::new();
        runtime.register_producer(reactive.id, NodeKind::Derived);
        runtime.register_reactive(
            reactive.id,
            Arc::downgrade(&(reactive.clone() as Arc<dyn Reactive>)),
        );

        runtime.settle(reactive.id).unwrap();
        assert_eq!(reactive.settled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_clears_all_tables() {
        let runtime = runtime();
        let reactive = MockReactive::new();
        runtime.register_producer(reactive.id, NodeKind::Derived);
        runtime.register_reactive(
            reactive.id,
            Arc::downgrade(&(reactive.clone() as Arc<dyn Reactive>)),
        );
        assert_eq!(runtime.node_count(), 1);

        runtime.unregister(reactive.id);
        assert_eq!(runtime.node_count(), 0);
        assert_eq!(runtime.version_of(reactive.id), None);
    }

    #[test]
    fn dropped_nodes_fall_out_of_the_sweep() {
        let runtime = runtime();
        let source = NodeId::new();
        runtime.register_producer(source, NodeKind::Source);

        let reactive = MockReactive::new();
        runtime.register_producer(reactive.id, NodeKind::Derived);
        runtime.register_reactive(
            reactive.id,
            Arc::downgrade(&(reactive.clone() as Arc<dyn Reactive>)),
        );
        runtime.set_dependencies(reactive.id, &[source]);

        drop(reactive);

        // The weak entry no longer upgrades; the sweep must not panic.
        runtime.cell_changed(source);
    }
}
