//! Output Bindings
//!
//! A binding pairs a sink name with the implicit derived node that computes
//! its value. The runtime refreshes bindings in declaration order after
//! every input change; a binding remembers the version it last pushed so an
//! unaffected sink is never re-pushed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EvalError;
use crate::graph::NodeId;
use crate::reactive::Derived;

use super::sink::SinkValue;

/// Sentinel: nothing pushed yet (or the last push was an error indicator).
const NEVER_PUSHED: u64 = u64::MAX;

pub struct OutputBinding {
    /// The sink this binding owns.
    name: String,

    /// The computation behind the sink.
    node: Derived<SinkValue>,

    /// Version of the node value last pushed to the sink.
    last_pushed: AtomicU64,
}

impl OutputBinding {
    pub(crate) fn new(name: String, node: Derived<SinkValue>) -> Self {
        Self {
            name,
            node,
            last_pushed: AtomicU64::new(NEVER_PUSHED),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The implicit node's graph id.
    pub(crate) fn node_id(&self) -> NodeId {
        self.node.id()
    }

    /// Bring the node's cache up to date.
    pub(crate) fn ensure_fresh(&self) -> Result<(), EvalError> {
        self.node.ensure_fresh()
    }

    /// The current value, if its version has not been pushed yet.
    ///
    /// Claims the version in the same step, so one refresh pass pushes a
    /// given value at most once.
    pub(crate) fn take_unpushed(&self) -> Option<SinkValue> {
        let version = self.node.version();
        if self.last_pushed.swap(version, Ordering::SeqCst) != version {
            self.node.cached()
        } else {
            None
        }
    }

    /// Record that the sink currently shows an error indicator, so the next
    /// successful value is pushed even if its version never moved.
    pub(crate) fn note_error(&self) {
        self.last_pushed.store(NEVER_PUSHED, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::output::MemorySink;
    use crate::reactive::SessionRuntime;

    #[test]
    fn take_unpushed_claims_each_version_once() {
        let runtime = SessionRuntime::new(Arc::new(MemorySink::new()));

        let node = Derived::new(&runtime, || SinkValue::from(1));
        node.read().unwrap();
        let binding = OutputBinding::new("out".into(), node);

        assert_eq!(binding.take_unpushed(), Some(SinkValue::from(1)));
        assert_eq!(binding.take_unpushed(), None);
    }

    #[test]
    fn note_error_forces_repush() {
        let runtime = SessionRuntime::new(Arc::new(MemorySink::new()));

        let node = Derived::new(&runtime, || SinkValue::from("v"));
        node.read().unwrap();
        let binding = OutputBinding::new("out".into(), node);

        assert!(binding.take_unpushed().is_some());
        binding.note_error();
        assert_eq!(binding.take_unpushed(), Some(SinkValue::from("v")));
    }
}
