//! Derived Nodes
//!
//! A derived node is a cached computation that re-evaluates only when its
//! dependencies change.
//!
//! # How Derived Nodes Work
//!
//! 1. On first read, the expression runs inside a tracking frame and the
//!    result is cached together with the `(producer, version)` pairs that
//!    were read.
//!
//! 2. When a dependency changes, the invalidation sweep marks the node
//!    maybe-stale. Nothing recomputes until somebody reads it.
//!
//! 3. On the next read, the recorded versions are verified against the
//!    producers' current versions. If every one still matches (an upstream
//!    node recomputed to an equal value, say), the cache is kept and the
//!    node is fresh again without re-running its expression.
//!
//! 4. If any version moved, the expression re-runs once: a single
//!    evaluation re-reads current values, so any number of accumulated
//!    upstream changes coalesce into one recomputation.
//!
//! The read set is captured fresh on every run, so conditional expressions
//! get exactly the dependencies of the branch they actually took.
//!
//! # Failure
//!
//! Expressions are fallible. An error aborts the recomputation, leaves the
//! node stale (it will retry on the next read), and propagates to the
//! caller; the rest of the session is unaffected. A re-entrant read of a
//! node that is currently evaluating is reported as [`EvalError::Cycle`].

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::warn;

use super::context::{DepRecord, EvalScope};
use super::runtime::{Reactive, SessionRuntime};
use crate::error::EvalError;
use crate::graph::{NodeId, NodeKind};

/// Staleness of a derived node's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The cached value is up-to-date.
    Fresh,

    /// A dependency might have changed; recorded versions need verifying
    /// before the cache can be trusted.
    MaybeStale,

    /// The node definitely needs to recompute (never ran, a dependency
    /// verification failed, or the last run errored).
    Stale,
}

/// Resets the in-progress marker when an evaluation unwinds or returns.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct DerivedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Unique identifier; doubles as this node's id in the graph.
    id: NodeId,

    /// The computation.
    compute: Box<dyn Fn() -> Result<T, EvalError> + Send + Sync>,

    /// The cached value (None if never successfully computed).
    value: RwLock<Option<T>>,

    /// Current staleness.
    state: RwLock<NodeState>,

    /// `(producer, version)` pairs recorded during the last evaluation.
    deps: RwLock<Vec<DepRecord>>,

    /// Own version stamp, shared with the session's version table. Bumped
    /// only when a recomputation produces a different value.
    version: Arc<AtomicU64>,

    /// Set while the expression is running; re-entry is a cycle.
    in_progress: AtomicBool,

    /// The owning session runtime.
    runtime: Weak<SessionRuntime>,
}

impl<T> DerivedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Bring the cache up to date without registering a dependency on this
    /// node. Returns Ok when a cached value is available.
    pub(crate) fn ensure_fresh(&self) -> Result<(), EvalError> {
        let state = *self.state.read().expect("state lock poisoned");
        match state {
            NodeState::Fresh => Ok(()),
            NodeState::MaybeStale => {
                if self.deps_unchanged() {
                    *self.state.write().expect("state lock poisoned") = NodeState::Fresh;
                    Ok(())
                } else {
                    self.recompute()
                }
            }
            NodeState::Stale => self.recompute(),
        }
    }

    /// Verify the recorded dependency versions against current ones.
    ///
    /// Each dependency is settled first, so an upstream maybe-stale node
    /// resolves (and bumps its version, if its value really changed) before
    /// the comparison. A settle failure counts as changed, since recomputing is
    /// how the upstream error reaches this node.
    fn deps_unchanged(&self) -> bool {
        let deps = self.deps.read().expect("deps lock poisoned").clone();
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };

        deps.iter().all(|(dep, seen)| {
            runtime.settle(*dep).is_ok() && runtime.version_of(*dep) == Some(*seen)
        })
    }

    /// Run the expression, capture its read set, and update cache + graph.
    fn recompute(&self) -> Result<(), EvalError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(EvalError::Cycle(self.id));
        }
        let _guard = InProgressGuard(&self.in_progress);

        let scope = EvalScope::enter(self.id);
        let result = (self.compute)();
        let new_deps = scope.finish();

        // Rebuild edges from what was actually read, also on the error
        // path, so a later upstream change still reaches this node.
        if let Some(runtime) = self.runtime.upgrade() {
            let ids: Vec<NodeId> = new_deps.iter().map(|(id, _)| *id).collect();
            runtime.set_dependencies(self.id, &ids);
        }
        *self.deps.write().expect("deps lock poisoned") = new_deps;

        match result {
            Ok(new_value) => {
                let changed = {
                    let current = self.value.read().expect("value lock poisoned");
                    current.as_ref() != Some(&new_value)
                };
                *self.value.write().expect("value lock poisoned") = Some(new_value);
                *self.state.write().expect("state lock poisoned") = NodeState::Fresh;
                if changed {
                    self.version.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
            Err(err) => {
                *self.state.write().expect("state lock poisoned") = NodeState::Stale;
                warn!(node = self.id.raw(), error = %err, "derived evaluation failed");
                Err(err)
            }
        }
    }

    fn cached(&self) -> Option<T> {
        self.value.read().expect("value lock poisoned").clone()
    }
}

impl<T> Reactive for DerivedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn mark_stale(&self) {
        let mut state = self.state.write().expect("state lock poisoned");
        if *state == NodeState::Fresh {
            *state = NodeState::MaybeStale;
        }
    }

    fn settle(&self) -> Result<(), EvalError> {
        self.ensure_fresh()
    }
}

/// A cached derived computation.
///
/// Cheap to clone; clones share the same cache and identity.
pub struct Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a derived node from an infallible expression.
    ///
    /// The expression does not run here; it runs on first read.
    pub(crate) fn new<F>(runtime: &Arc<SessionRuntime>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::try_new(runtime, move || Ok(compute()))
    }

    /// Create a derived node from a fallible expression.
    pub(crate) fn try_new<F>(runtime: &Arc<SessionRuntime>, compute: F) -> Self
    where
        F: Fn() -> Result<T, EvalError> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let version = runtime.register_producer(id, NodeKind::Derived);
        let inner = Arc::new(DerivedInner {
            id,
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(NodeState::Stale),
            deps: RwLock::new(Vec::new()),
            version,
            in_progress: AtomicBool::new(false),
            runtime: Arc::downgrade(runtime),
        });
        let reactive: Arc<dyn Reactive> = inner.clone();
        runtime.register_reactive(id, Arc::downgrade(&reactive));
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

    /// Get the current staleness.
    pub fn state(&self) -> NodeState {
        *self.inner.state.read().expect("state lock poisoned")
    }

    /// Whether a value has ever been computed.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().expect("value lock poisoned").is_some()
    }

    /// Read the node's value, recomputing if necessary.
    ///
    /// A fresh cache is returned as-is; otherwise the expression runs once.
    /// If called during a tracked evaluation, registers this node in the
    /// reader's dependency set.
    pub fn read(&self) -> Result<T, EvalError> {
        self.inner.ensure_fresh()?;
        EvalScope::record(self.inner.id, self.inner.version.load(Ordering::SeqCst));
        Ok(self
            .inner
            .cached()
            .expect("fresh node has a value"))
    }

    /// Bring the cache up to date without reading it (no dependency is
    /// registered on this node).
    pub(crate) fn ensure_fresh(&self) -> Result<(), EvalError> {
        self.inner.ensure_fresh()
    }

    /// The cached value, if any, without recomputing or tracking.
    pub(crate) fn cached(&self) -> Option<T> {
        self.inner.cached()
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::output::MemorySink;
    use crate::session::Session;

    fn session() -> Session {
        Session::new(Arc::new(MemorySink::new()))
    }

    #[test]
    fn computes_on_first_read() {
        let session = session();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let node = session.derived(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!node.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        assert_eq!(node.read().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(node.has_value());
    }

    #[test]
    fn caches_value_when_fresh() {
        let session = session();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let node = session.derived(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(node.read().unwrap(), 42);
        assert_eq!(node.read().unwrap(), 42);
        assert_eq!(node.read().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recomputes_after_dependency_set() {
        let session = session();
        let cell = session.cell(10);

        let cell_clone = cell.clone();
        let node = session.derived(move || cell_clone.get() * 2);

        assert_eq!(node.read().unwrap(), 20);

        cell.set(5);
        assert_eq!(node.read().unwrap(), 10);
    }

    #[test]
    fn unrelated_cell_does_not_invalidate() {
        let session = session();
        let cell_a = session.cell(5);
        let cell_b = session.cell(0);
        let call_count = Arc::new(AtomicI32::new(0));

        let cell_a_clone = cell_a.clone();
        let call_count_clone = call_count.clone();
        let node = session.derived(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            cell_a_clone.get() * 2
        });

        assert_eq!(node.read().unwrap(), 10);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        cell_b.set(1);
        assert_eq!(node.read().unwrap(), 10);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equal_upstream_value_keeps_downstream_cache() {
        let session = session();
        let cell = session.cell(3);

        // Quantizing node: 3/10 == 7/10 == 0.
        let cell_clone = cell.clone();
        let tens = session.derived(move || cell_clone.get() / 10);

        let downstream_count = Arc::new(AtomicI32::new(0));
        let downstream_count_clone = downstream_count.clone();
        let tens_clone = tens.clone();
        let label = session.try_derived(move || {
            downstream_count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(format!("bucket {}", tens_clone.read()?))
        });

        assert_eq!(label.read().unwrap(), "bucket 0");
        assert_eq!(downstream_count.load(Ordering::SeqCst), 1);

        // Upstream recomputes to the same value; downstream cache survives.
        cell.set(7);
        assert_eq!(label.read().unwrap(), "bucket 0");
        assert_eq!(downstream_count.load(Ordering::SeqCst), 1);

        // A real change propagates.
        cell.set(25);
        assert_eq!(label.read().unwrap(), "bucket 2");
        assert_eq!(downstream_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn conditional_dependencies_rebuild_per_run() {
        let session = session();
        let flag = session.cell(true);
        let left = session.cell(1);
        let right = session.cell(100);
        let call_count = Arc::new(AtomicI32::new(0));

        let (flag_c, left_c, right_c) = (flag.clone(), left.clone(), right.clone());
        let call_count_clone = call_count.clone();
        let node = session.derived(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            if flag_c.get() {
                left_c.get()
            } else {
                right_c.get()
            }
        });

        assert_eq!(node.read().unwrap(), 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // While the flag selects `left`, changes to `right` are invisible.
        right.set(200);
        assert_eq!(node.read().unwrap(), 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // Flip the branch; now `right` matters and `left` does not.
        flag.set(false);
        assert_eq!(node.read().unwrap(), 200);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        left.set(50);
        assert_eq!(node.read().unwrap(), 200);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_evaluation_leaves_node_stale_and_retries() {
        let session = session();
        let cell = session.cell(0);

        let cell_clone = cell.clone();
        let node = session.try_derived(move || {
            let v = cell_clone.get();
            if v == 0 {
                Err(EvalError::failed("value not ready"))
            } else {
                Ok(v * 2)
            }
        });

        assert!(matches!(node.read(), Err(EvalError::Failed(_))));
        assert_eq!(node.state(), NodeState::Stale);
        assert!(!node.has_value());

        cell.set(4);
        assert_eq!(node.read().unwrap(), 8);
        assert_eq!(node.state(), NodeState::Fresh);
    }

    #[test]
    fn self_referential_node_reports_cycle() {
        let session = session();

        // Tie the knot through a shared slot.
        let slot: Arc<std::sync::RwLock<Option<Derived<i32>>>> =
            Arc::new(std::sync::RwLock::new(None));
        let slot_clone = slot.clone();
        let node = session.try_derived(move || {
            let guard = slot_clone.read().expect("slot lock poisoned");
            match guard.as_ref() {
                Some(me) => me.read(),
                None => Ok(0),
            }
        });
        *slot.write().expect("slot lock poisoned") = Some(node.clone());

        assert!(matches!(node.read(), Err(EvalError::Cycle(_))));
    }

    #[test]
    fn clone_shares_cache() {
        let session = session();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let node1 = session.derived(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });
        let node2 = node1.clone();

        assert_eq!(node1.id(), node2.id());
        assert_eq!(node1.read().unwrap(), 42);
        assert_eq!(node2.read().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
