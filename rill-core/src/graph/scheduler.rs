//! Invalidation Scheduler
//!
//! The scheduler owns the dependency graph and answers one question: given a
//! changed source, which nodes are transitively affected, and in what order
//! should they be marked for recomputation?
//!
//! # Algorithm
//!
//! 1. When a source node changes, walk its dependents breadth-first to
//!    collect the transitive dependent set.
//! 2. Sort that set topologically (dependencies before dependents, Kahn's
//!    algorithm) so marking is deterministic and upstream nodes settle
//!    before anything downstream looks at them.
//! 3. The caller marks each returned node stale; actual recomputation is
//!    pulled lazily by reads and by the output refresh pass.
//!
//! Edges are not static: a consumer's in-edges are rebuilt from its recorded
//! read set after every evaluation via [`InvalidationScheduler::set_dependencies`].

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use super::node::{Node, NodeId, NodeKind};

/// The invalidation scheduler manages the dependency graph and determines
/// the propagation order for changes.
pub struct InvalidationScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl InvalidationScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes.insert(id, Node::new(id, kind));
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }

            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Add a dependency edge: `dependent` reads from `dependency`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace a consumer's in-edges with the read set from its latest
    /// evaluation.
    ///
    /// Edges that disappeared are removed on both sides, new ones are added.
    /// After this call the graph is consistent with what the node actually
    /// read.
    pub fn set_dependencies(&mut self, consumer: NodeId, deps: &[NodeId]) {
        let old: Vec<NodeId> = match self.nodes.get(&consumer) {
            Some(node) => node.dependencies().iter().copied().collect(),
            None => return,
        };
        let new: HashSet<NodeId> = deps.iter().copied().collect();

        for dep in &old {
            if !new.contains(dep) {
                self.remove_edge(*dep, consumer);
            }
        }
        for dep in &new {
            self.add_edge(*dep, consumer);
        }

        trace!(
            consumer = consumer.raw(),
            dep_count = new.len(),
            "rebuilt dependency edges"
        );
    }

    /// Compute the transitive dependent set of a changed source.
    ///
    /// Returns the affected node IDs in topological order (dependencies
    /// before dependents). The caller is responsible for marking each one
    /// stale; nothing is recomputed here.
    pub fn mark_changed(&self, source_id: NodeId) -> Vec<NodeId> {
        let mut affected = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.nodes.get(&source_id) {
            for dependent_id in source.dependents() {
                queue.push_back(*dependent_id);
            }
        }

        while let Some(node_id) = queue.pop_front() {
            if visited.contains(&node_id) {
                continue;
            }
            visited.insert(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                affected.push(node_id);
                for dependent_id in node.dependents() {
                    queue.push_back(*dependent_id);
                }
            }
        }

        trace!(
            source = source_id.raw(),
            affected = affected.len(),
            "invalidation sweep"
        );

        self.topological_sort(affected)
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        // In-degrees only count edges within the affected set.
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies().len()).sum()
    }

    /// Get the direct dependents of a node, if it exists.
    pub fn dependents_of(&self, node_id: NodeId) -> Option<Vec<NodeId>> {
        self.nodes
            .get(&node_id)
            .map(|n| n.dependents().iter().copied().collect())
    }
}

impl Default for InvalidationScheduler {
    fn default() -> Self {
        Self::new()
    }
}
