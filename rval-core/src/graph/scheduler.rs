//! Update Scheduler
//!
//! The scheduler owns every node record and maintains the edges between
//! them. It decides which nodes are dirty after a change, keeps observer
//! counts, and holds the queue of deferred cold transitions.
//!
//! # Algorithm
//!
//! 1. When a cell changes, mark its direct dependents "dirty"
//! 2. Propagate "maybe dirty" to their dependents, recursively
//! 3. Collect every touched node and sort them topologically
//!    (dependencies before dependents)
//! 4. Reading a node later resolves "maybe dirty" by refreshing its sources
//!    in order; it recomputes only once one of them has actually changed
//!
//! Only warm nodes are registered as dependents, so propagation never
//! reaches a cold derivation. A cold derivation distrusts its cache instead.
//!
//! # Warmth
//!
//! A node is warm while something observes it: a subscription, a keep-alive
//! handle, or a warm dependent. Warming a node attaches it to its sources,
//! which warms them in turn. When the last observer leaves, the node goes cold
//! either immediately (for sources dropped by a warm dependent) or after a
//! grace window (for subscriptions), see [`UpdateScheduler::relinquish`].

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::node::{Dependencies, Node, NodeId, NodeKind};

/// The update scheduler manages the dependency graph and coordinates updates.
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Nodes waiting to go cold, with the instant their grace window ends.
    teardowns: IndexMap<NodeId, Instant>,

    /// Incremented on every cell change.
    epoch: u64,

    /// Source of change stamps, see [`Node::changed_at`].
    clock: u64,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            teardowns: IndexMap::new(),
            epoch: 0,
            clock: 0,
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and releases the hold a
    /// warm node has on its sources.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        self.teardowns.shift_remove(&node_id);
        if self.nodes.get(&node_id).is_some_and(Node::is_warm) {
            self.cool(node_id);
        }

        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its dependents' source lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_source(node_id);
            }
        }

        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Current graph epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Add a dependency edge: `dependent` reads `dependency`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
    }

    /// Mark a cell as changed and propagate dirty flags.
    ///
    /// Returns the touched nodes in dependency order, starting with the cell.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        self.epoch += 1;
        self.clock += 1;
        let stamp = self.clock;

        if let Some(source) = self.nodes.get_mut(&source_id) {
            source.bump_revision();
            source.set_changed_at(stamp);
        }

        let mut to_process = vec![source_id];
        let mut visited = HashSet::from([source_id]);
        let mut queue = VecDeque::new();

        // Direct dependents are known to be dirty
        let direct: Vec<NodeId> = self
            .nodes
            .get(&source_id)
            .map(|source| source.dependents().iter().copied().collect())
            .unwrap_or_default();
        for dependent_id in direct {
            if let Some(node) = self.nodes.get_mut(&dependent_id) {
                node.mark_dirty();
            }
            queue.push_back(dependent_id);
        }

        // BFS to propagate maybe-dirty status
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                to_process.push(node_id);

                for dependent_id in node.dependents() {
                    queue.push_back(*dependent_id);
                }
            }
        }

        trace!(cell = %source_id, touched = to_process.len() - 1, "dirty propagation");

        // Sort topologically so dependencies are processed first
        self.topological_sort(to_process)
    }

    /// Give a cell back the stamp it had before a transaction, after its
    /// value was written back to what it was then.
    pub fn restore_stamp(&mut self, node_id: NodeId, stamp: u64) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_changed_at(stamp);
        }
    }

    /// Stamp identifying a node's current value.
    pub fn change_stamp(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::changed_at)
    }

    /// Whether `source` still holds the value `node_id` last saw.
    pub fn source_unchanged(&self, node_id: NodeId, source: NodeId) -> bool {
        let seen = self.nodes.get(&node_id).and_then(|node| node.seen_stamp(source));
        seen.is_some() && seen == self.change_stamp(source)
    }

    /// Mark the warm dependents of a derivation whose value just changed.
    pub fn mark_dependents_dirty(&mut self, node_id: NodeId) {
        let dependents: Vec<NodeId> = self
            .nodes
            .get(&node_id)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default();
        for dependent_id in dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                dependent.mark_dirty();
            }
        }
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .sources()
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
                for dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Store the outcome of a successful evaluation.
    ///
    /// Replaces the dependency set with the one just recorded. A warm node
    /// attaches to sources it did not read before and lets go of the ones it
    /// no longer reads; sources read both times are left untouched.
    pub fn complete_evaluation(&mut self, node_id: NodeId, sources: Dependencies, changed: bool) {
        let epoch = self.epoch;
        let stamps = sources
            .iter()
            .map(|source| self.change_stamp(*source).unwrap_or(u64::MAX))
            .collect();
        if changed {
            self.clock += 1;
        }
        let stamp = self.clock;
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let warm = node.is_warm();
        node.record_evaluation(epoch);
        if changed {
            node.bump_revision();
            node.set_changed_at(stamp);
        }
        let previous = node.replace_sources(sources.clone(), stamps);

        if warm {
            for &added in sources.iter().filter(|id| !previous.contains(id)) {
                trace!(node = %node_id, source = %added, "edge added");
                self.add_edge(added, node_id);
                self.acquire(added);
            }
            for &removed in previous.iter().filter(|id| !sources.contains(id)) {
                trace!(node = %node_id, source = %removed, "edge dropped");
                self.remove_edge(removed, node_id);
                self.relinquish(removed, None);
            }
            if changed {
                self.mark_dependents_dirty(node_id);
            }
        }
    }

    /// Resolve a `MaybeDirty` node whose sources turned out unchanged.
    pub fn mark_verified(&mut self, node_id: NodeId) {
        let epoch = self.epoch;
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.record_verified(epoch);
        }
    }

    /// Add an observer to a node, warming it on the first one.
    ///
    /// If the node is inside its grace window the pending teardown is
    /// cancelled and the existing cache and wiring are reused as they are.
    /// A window that has already elapsed is applied first, even if nobody
    /// has swept it yet.
    pub fn acquire(&mut self, node_id: NodeId) {
        let first = match self.nodes.get_mut(&node_id) {
            Some(node) => node.retain(),
            None => return,
        };
        if !first {
            return;
        }
        match self.teardowns.shift_remove(&node_id) {
            Some(deadline) if deadline > Instant::now() => {
                debug!(node = %node_id, "teardown cancelled, reusing warm cache");
                return;
            }
            Some(_) => {
                debug!(node = %node_id, "grace window elapsed before reuse");
                self.cool(node_id);
            }
            None => {}
        }
        self.warm(node_id);
    }

    /// Remove an observer from a node.
    ///
    /// When the last observer leaves, a warm derivation goes cold at
    /// `deadline`, or immediately if no deadline is given.
    pub fn relinquish(&mut self, node_id: NodeId, deadline: Option<Instant>) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if !node.release() || node.kind() != NodeKind::Derived || !node.is_warm() {
            return;
        }
        match deadline {
            Some(deadline) => {
                debug!(node = %node_id, "teardown scheduled");
                self.teardowns.insert(node_id, deadline);
            }
            None => self.cool(node_id),
        }
    }

    /// Attach a node to its current sources.
    ///
    /// A cache computed while cold is only kept if nothing has changed in
    /// the graph since.
    fn warm(&mut self, node_id: NodeId) {
        let epoch = self.epoch;
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if node.is_warm() {
            return;
        }
        node.set_warm(true);
        if node.kind() == NodeKind::Cell {
            return;
        }
        if node.is_evaluated() && node.verified_at() != epoch {
            node.mark_dirty();
        }
        debug!(node = %node_id, dirty = ?node.dirty_state(), "node warmed");

        let sources: Dependencies = node.sources().iter().copied().collect();
        for source in sources {
            self.add_edge(source, node_id);
            self.acquire(source);
        }
    }

    /// Detach a node from its sources.
    fn cool(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if !node.is_warm() {
            return;
        }
        node.set_warm(false);
        debug!(node = %node_id, "node went cold");

        let sources: Dependencies = node.sources().iter().copied().collect();
        for source in sources {
            self.remove_edge(source, node_id);
            self.relinquish(source, None);
        }
    }

    /// Apply every teardown whose grace window ended at or before `now`.
    ///
    /// Returns the number of nodes that went cold.
    pub fn sweep_teardowns(&mut self, now: Instant) -> usize {
        let expired: Vec<NodeId> = self
            .teardowns
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        self.apply_teardowns(expired)
    }

    /// Apply every pending teardown regardless of its deadline.
    pub fn flush_teardowns(&mut self) -> usize {
        let pending: Vec<NodeId> = self.teardowns.keys().copied().collect();
        self.apply_teardowns(pending)
    }

    fn apply_teardowns(&mut self, ids: Vec<NodeId>) -> usize {
        let mut cooled = 0;
        for id in ids {
            self.teardowns.shift_remove(&id);
            let idle = self
                .nodes
                .get(&id)
                .is_some_and(|node| node.observers() == 0 && node.is_warm());
            if idle {
                self.cool(id);
                cooled += 1;
            }
        }
        cooled
    }

    /// Earliest pending teardown deadline.
    pub fn next_teardown(&self) -> Option<Instant> {
        self.teardowns.values().min().copied()
    }

    pub fn pending_teardowns(&self) -> usize {
        self.teardowns.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}
