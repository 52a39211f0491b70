//! Evaluation errors.
//!
//! Errors are scoped to the computation they occur in: a failing expression
//! leaves its own node stale and surfaces at the affected output sink, while
//! the rest of the session keeps updating.

use thiserror::Error;

use crate::graph::NodeId;

/// An error raised while evaluating a reactive expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// A node's expression read the node itself, directly or transitively.
    /// Detected via a per-node in-progress marker; fatal for that node's
    /// evaluation, never an infinite loop.
    #[error("dependency cycle: node {} re-entered during its own evaluation", .0.raw())]
    Cycle(NodeId),

    /// An event-gated accessor was read before its trigger ever advanced.
    /// There is no value yet; output bindings treat this as "nothing to
    /// show" rather than an error indicator.
    #[error("event gate has not fired yet")]
    AwaitingTrigger,

    /// The expression itself failed.
    #[error("evaluation failed: {0}")]
    Failed(String),
}

impl EvalError {
    /// Build a [`EvalError::Failed`] from anything displayable.
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}
