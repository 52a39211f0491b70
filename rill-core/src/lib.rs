//! Rill Core
//!
//! This crate provides the core reactive engine for the Rill web UI
//! framework. It implements:
//!
//! - Reactive primitives (value cells, derived nodes, event gates)
//! - Dependency tracking with per-evaluation read capture
//! - Invalidation scheduling over a session-scoped dependency graph
//! - Named output bindings pushed to an external sink
//!
//! The engine knows nothing about HTML, layout, or widget kinds: input
//! widgets declare cell identifiers, output widgets declare sink names, and
//! everything in between is this crate.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: core primitives and dependency tracking
//! - `graph`: the dependency graph and invalidation scheduler
//! - `output`: sinks, bindings, and render wrappers
//! - `session`: per-connection graph instances and their registry
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rill_core::{MemorySink, Session, render_text};
//!
//! let sink = Arc::new(MemorySink::new());
//! let session = Session::new(sink.clone());
//!
//! // An input widget declared a slider named "n".
//! let n = session.input("n", 50);
//!
//! // A derived value, computed once and cached.
//! let n2 = n.clone();
//! let doubled = session.derived(move || n2.get() * 2);
//!
//! // A text output. Refreshes whenever `n` changes.
//! let d = doubled.clone();
//! session.bind("n_doubled", render_text(move || {
//!     format!("n * 2 = {}", d.read().unwrap_or_default())
//! }));
//!
//! // External input change: the binding refreshes automatically.
//! n.set(21);
//! ```

pub mod error;
pub mod graph;
pub mod output;
pub mod reactive;
pub mod session;

pub use error::EvalError;
pub use output::{
    render_table, render_text, render_value, MemorySink, OutputHandle, OutputSink, SinkUpdate,
    SinkValue,
};
pub use reactive::{isolate, Derived, EventObserver, GatedDerived, NodeState, ValueCell};
pub use session::{Session, SessionId, SessionRegistry};
