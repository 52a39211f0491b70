//! Evaluation Context
//!
//! The evaluation context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read, the
//! engine registers it (together with its current version) against the
//! computation on top of the stack.
//!
//! # Implementation
//!
//! A thread-local stack of frames tracks the currently executing
//! computation. Evaluating a derived node pushes a tracking frame; when the
//! evaluation completes, the frame is popped and its collected read set
//! becomes the node's dependency list. Because it is a stack, nested
//! evaluations (a derived node that reads another derived node) compose
//! naturally: each evaluation collects only its own reads.
//!
//! # Isolation
//!
//! [`isolate`] pushes a frame that discards reads instead of collecting
//! them. Only the top frame matters, so an isolated region inside a tracked
//! evaluation hides its reads from the enclosing node, while a tracked
//! evaluation started *inside* an isolated region (say, a stale node being
//! refreshed on demand) still collects its own dependencies correctly.
//!
//! All frames pop on drop, so a panicking expression cannot leave the stack
//! corrupted.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::NodeId;

/// A dependency observed during evaluation: the producer and the version it
/// had at read time.
pub type DepRecord = (NodeId, u64);

/// Most expressions read only a handful of cells; keep the buffer inline.
type DepBuffer = SmallVec<[DepRecord; 8]>;

thread_local! {
    static EVAL_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// An entry in the evaluation stack.
enum Frame {
    /// A computation whose reads are being collected.
    Tracking {
        consumer: NodeId,
        deps: DepBuffer,
    },

    /// A region whose reads are deliberately discarded.
    Isolated,
}

/// Guard for a tracking frame. Created when a node begins evaluating;
/// consumed by [`EvalScope::finish`] (or popped on drop if the evaluation
/// unwinds).
pub struct EvalScope {
    consumer: NodeId,
    finished: bool,
}

impl EvalScope {
    /// Enter a tracking frame for the given consumer.
    ///
    /// While this frame is on top of the stack, every non-isolated read
    /// records `(producer, version)` into it.
    pub fn enter(consumer: NodeId) -> Self {
        EVAL_STACK.with(|stack| {
            stack.borrow_mut().push(Frame::Tracking {
                consumer,
                deps: DepBuffer::new(),
            });
        });
        Self {
            consumer,
            finished: false,
        }
    }

    /// Pop the frame and return the dependencies collected during it.
    pub fn finish(mut self) -> Vec<DepRecord> {
        self.finished = true;
        EVAL_STACK.with(|stack| {
            match stack.borrow_mut().pop() {
                Some(Frame::Tracking { consumer, deps }) => {
                    debug_assert_eq!(
                        consumer, self.consumer,
                        "evaluation stack mismatch: expected {:?}, got {:?}",
                        self.consumer, consumer
                    );
                    deps.into_vec()
                }
                // Unbalanced push/pop would be an engine bug; recover with
                // an empty read set rather than panicking in release.
                _ => Vec::new(),
            }
        })
    }

    /// Record a read of `producer` at `version` into the innermost frame.
    ///
    /// No-op when the stack is empty or the top frame is isolated.
    pub fn record(producer: NodeId, version: u64) {
        EVAL_STACK.with(|stack| {
            if let Some(Frame::Tracking { deps, .. }) = stack.borrow_mut().last_mut() {
                deps.push((producer, version));
            }
        });
    }

    /// Whether reads are currently being collected.
    pub fn is_tracking() -> bool {
        EVAL_STACK.with(|stack| {
            matches!(stack.borrow().last(), Some(Frame::Tracking { .. }))
        })
    }

    /// The consumer currently collecting reads, if any.
    pub fn current_consumer() -> Option<NodeId> {
        EVAL_STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Tracking { consumer, .. }) => Some(*consumer),
            _ => None,
        })
    }
}

impl Drop for EvalScope {
    fn drop(&mut self) {
        if !self.finished {
            EVAL_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
}

/// Evaluate `f` with dependency collection disabled.
///
/// Nothing read inside `f` is added to the enclosing node's dependency
/// list, so the enclosing node is not invalidated when those values change.
pub fn isolate<R>(f: impl FnOnce() -> R) -> R {
    struct IsolateGuard;

    impl Drop for IsolateGuard {
        fn drop(&mut self) {
            EVAL_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }

    EVAL_STACK.with(|stack| stack.borrow_mut().push(Frame::Isolated));
    let _guard = IsolateGuard;
    f()
}
