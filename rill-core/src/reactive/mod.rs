//! Reactive Primitives
//!
//! This module implements the core reactive system: value cells, derived
//! nodes, and event gates.
//!
//! # Concepts
//!
//! ## Value Cells
//!
//! A cell is a container for mutable input state with a version stamp. When
//! a cell is read during a tracked evaluation, the read is recorded as a
//! dependency of the evaluating node. Setting a cell bumps the version
//! unconditionally and drives one invalidation pass.
//!
//! ## Derived Nodes
//!
//! A derived node caches the result of an expression and re-evaluates only
//! when one of the dependencies recorded during its last run has actually
//! changed. Dependencies are dynamic: re-captured on every evaluation.
//!
//! ## Event Gates
//!
//! An event gate limits re-evaluation to advances of one declared trigger
//! cell. Everything else the gated expression reads is isolated.
//!
//! # Implementation Notes
//!
//! Dependency detection uses a thread-local stack of evaluation frames:
//! reading a cell consults the frame on top and records itself there, which
//! is how conditional expressions get exactly the dependencies of the
//! branch they took. There is no process-global engine state; the graph,
//! version table, and bindings all live in a per-session runtime.

mod cell;
mod context;
mod derived;
mod event;
mod runtime;

pub use cell::ValueCell;
pub use context::{isolate, DepRecord, EvalScope};
pub use derived::{Derived, NodeState};
pub use event::{EventObserver, GatedDerived};
pub use runtime::{Reactive, SessionRuntime};
