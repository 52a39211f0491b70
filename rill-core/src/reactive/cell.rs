//! Value Cells
//!
//! A value cell is the fundamental reactive input. It holds a value and a
//! version stamp, and it is the only place change enters the system.
//!
//! # How Cells Work
//!
//! 1. When a cell is read during a tracked evaluation, the cell and its
//!    current version are recorded into the evaluating node's read set.
//!
//! 2. When a cell's value is set, its version is bumped and the session
//!    runtime runs one full invalidation pass: transitive dependents are
//!    marked stale, event observers gated on this cell fire, and output
//!    bindings refresh in declaration order.
//!
//! # Versioning
//!
//! The version strictly increases on every `set`, even when the new value
//! equals the old one. Change is identity-based: setting a cell always
//! notifies, which is what lets a button-style trigger cell carry the same
//! payload repeatedly and still fire its gate each time.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::trace;

use super::context::EvalScope;
use super::runtime::SessionRuntime;
use crate::graph::{NodeId, NodeKind};

/// A reactive value cell holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let session = Session::new(sink);
/// let count = session.cell(0);
///
/// // Read the value (tracked when inside an evaluation)
/// let value = count.get();
///
/// // Update the value (bumps the version, notifies dependents)
/// count.set(5);
/// ```
pub struct ValueCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this cell.
    id: NodeId,

    /// The current value, protected by RwLock for thread safety.
    value: Arc<RwLock<T>>,

    /// Version stamp, shared with the session's version table.
    version: Arc<AtomicU64>,

    /// The owning session runtime. Weak so a torn-down session can free its
    /// graph even while application code still holds cells.
    runtime: Weak<SessionRuntime>,
}

impl<T> ValueCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell registered with the given session runtime.
    pub(crate) fn new(runtime: &Arc<SessionRuntime>, value: T) -> Self {
        let id = NodeId::new();
        let version = runtime.register_producer(id, NodeKind::Source);
        Self {
            id,
            value: Arc::new(RwLock::new(value)),
            version,
            runtime: Arc::downgrade(runtime),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the cell's current version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// The version stamp handle, for gates that watch this cell.
    pub(crate) fn version_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.version)
    }

    /// Get the current value.
    ///
    /// If called during a tracked evaluation, registers this cell and its
    /// current version in the evaluating node's read set.
    pub fn get(&self) -> T {
        EvalScope::record(self.id, self.version.load(Ordering::SeqCst));
        self.value.read().expect("value lock poisoned").clone()
    }

    /// Get the current value without recording a dependency.
    pub fn peek(&self) -> T {
        self.value.read().expect("value lock poisoned").clone()
    }

    /// Set a new value and drive an invalidation pass.
    ///
    /// The version is bumped unconditionally, so dependents are notified
    /// even when the new value equals the old one.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.value.write().expect("value lock poisoned");
            *guard = value;
        }
        self.version.fetch_add(1, Ordering::SeqCst);

        match self.runtime.upgrade() {
            Some(runtime) => runtime.cell_changed(self.id),
            None => trace!(cell = self.id.raw(), "set on torn-down session"),
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read().expect("value lock poisoned");
            f(&guard)
        };
        self.set(new_value);
    }
}

impl<T> Clone for ValueCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            version: Arc::clone(&self.version),
            runtime: Weak::clone(&self.runtime),
        }
    }
}

impl<T> Debug for ValueCell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCell")
            .field("id", &self.id)
            .field("value", &self.peek())
            .field("version", &self.version())
            .finish()
    }
}
