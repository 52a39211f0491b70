//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between value cells and the computations that read them.
//!
//! # Overview
//!
//! The graph is a DAG where:
//!
//! - Nodes represent value cells (sources), derived computations, or
//!   event-gated computations
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a cell changes, the scheduler traverses the graph to find the
//! transitive dependent set and returns it in topological order; the session
//! runtime marks those nodes stale and the output refresh pass pulls fresh
//! values.
//!
//! # Design Decisions
//!
//! 1. A centralized graph rather than distributed linked lists:
//!    - It enables topological ordering for deterministic marking
//!    - It gives one place to rebuild a node's in-edges after evaluation
//!    - It makes introspection (node/edge counts) trivial
//!
//! 2. The graph stores structure only. Staleness lives on the reactive
//!    objects, which are the single source of truth for cache validity.
//!
//! 3. Both forward (dependencies) and reverse (dependents) edges are kept
//!    for efficient traversal in either direction.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind};
pub use scheduler::InvalidationScheduler;
