//! Graph Nodes
//!
//! This module defines node identity and the edge storage for the dependency
//! graph. Every reactive entity in a session (value cells, derived nodes,
//! event gates) occupies exactly one node, so a single id space covers
//! producers and consumers alike.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node in the dependency graph.
///
/// Ids are drawn from a process-wide atomic counter, so they are unique
/// across sessions as well as within one. This means a dependency recorded
/// under the wrong session can never silently alias a local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A value cell. Roots of the graph: no dependencies, only dependents.
    Source,

    /// A derived computation. Has dependencies and may have dependents.
    Derived,

    /// An event-gated computation. Its only in-edge is its trigger cell;
    /// everything else it reads is isolated and leaves no edge.
    Gated,
}

/// A node in the dependency graph.
///
/// Holds structure only. Staleness lives on the reactive objects themselves,
/// which are the single source of truth for whether a cached value can be
/// trusted.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Nodes this node reads from (in-edges). Rebuilt after every
    /// evaluation, since the read set can differ between runs.
    dependencies: HashSet<NodeId>,

    /// Nodes that read from this node (out-edges).
    dependents: HashSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind and id.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Add a dependency (a node that this node reads from).
    pub fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    /// Remove a dependency.
    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.remove(&node_id);
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &HashSet<NodeId> {
        &self.dependencies
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &HashSet<NodeId> {
        &self.dependents
    }
}
