//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//! A node holds only bookkeeping (edges, dirty state, observer counts); the
//! typed value lives in the `Cell` or `Derived` handle that owns the node.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::reactive::SubscriptionId;

/// Dependencies recorded during one evaluation, in first-read order.
pub type Dependencies = SmallVec<[NodeId; 4]>;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
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

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A cell. Cells are the roots of the graph: they have dependents but
    /// never dependencies, and they are the only nodes that originate change.
    Cell,

    /// A derivation. Derivations read other nodes and cache the result.
    Derived,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. Something upstream changed,
    /// but none of its direct dependencies has been shown to differ yet.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct dependency changed.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Nodes read during the most recent successful evaluation.
    sources: Dependencies,

    /// Change stamp of each source when this node last checked it, parallel
    /// to `sources`.
    source_stamps: SmallVec<[u64; 4]>,

    /// Warm nodes that read this node. Cold readers never appear here.
    dependents: IndexSet<NodeId>,

    /// Subscriptions with a callback attached directly to this node.
    listeners: SmallVec<[SubscriptionId; 2]>,

    /// Subscriptions, keep-alive handles and warm dependents holding this node.
    observers: usize,

    /// Whether the edges to `sources` are maintained. Only a warm node may
    /// serve reads from its cache.
    warm: bool,

    evaluated: bool,

    /// The last evaluation failed; the next read must recompute.
    stale: bool,

    /// Graph epoch at which the cached value was last known to be current.
    verified_at: u64,

    /// Incremented every time the node's value actually changes.
    revision: u64,

    /// Change-clock stamp identifying the current value. Unique per change
    /// across the graph, except that a cell reverted inside a transaction
    /// gets its pre-transaction stamp back.
    changed_at: u64,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Cell => DirtyState::Clean,
                NodeKind::Derived => DirtyState::Dirty, // Start dirty to ensure first computation
            },
            sources: Dependencies::new(),
            source_stamps: SmallVec::new(),
            dependents: IndexSet::new(),
            listeners: SmallVec::new(),
            observers: 0,
            warm: false,
            evaluated: matches!(kind, NodeKind::Cell),
            stale: false,
            verified_at: 0,
            revision: 0,
            changed_at: 0,
        }
    }

    /// Create a new cell node.
    pub fn cell(id: NodeId) -> Self {
        Self::new(id, NodeKind::Cell)
    }

    /// Create a new derived node.
    pub fn derived(id: NodeId) -> Self {
        Self::new(id, NodeKind::Derived)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty (something upstream might have changed).
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        if self.kind == NodeKind::Derived {
            self.dirty = DirtyState::Dirty;
        }
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    pub(crate) fn set_warm(&mut self, warm: bool) {
        self.warm = warm;
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// Whether the cache must be recomputed regardless of its sources.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Record a failed evaluation. The cached value is kept but not trusted.
    pub(crate) fn mark_failed(&mut self) {
        self.stale = true;
        self.mark_dirty();
    }

    pub fn changed_at(&self) -> u64 {
        self.changed_at
    }

    pub(crate) fn set_changed_at(&mut self, stamp: u64) {
        self.changed_at = stamp;
    }

    pub fn observers(&self) -> usize {
        self.observers
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn verified_at(&self) -> u64 {
        self.verified_at
    }

    /// Record a completed evaluation at the given epoch.
    pub(crate) fn record_evaluation(&mut self, epoch: u64) {
        self.evaluated = true;
        self.stale = false;
        self.verified_at = epoch;
        self.dirty = DirtyState::Clean;
    }

    /// Record that a `MaybeDirty` check found nothing changed.
    pub(crate) fn record_verified(&mut self, epoch: u64) {
        self.verified_at = epoch;
        self.dirty = DirtyState::Clean;
    }

    /// Increment the observer count. Returns true on the 0 -> 1 transition.
    pub(crate) fn retain(&mut self) -> bool {
        self.observers += 1;
        self.observers == 1
    }

    /// Decrement the observer count. Returns true on the 1 -> 0 transition.
    pub(crate) fn release(&mut self) -> bool {
        match self.observers {
            0 => false,
            n => {
                self.observers = n - 1;
                self.observers == 0
            }
        }
    }

    /// Nodes read during the most recent successful evaluation.
    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub(crate) fn replace_sources(
        &mut self,
        sources: Dependencies,
        stamps: SmallVec<[u64; 4]>,
    ) -> Dependencies {
        self.source_stamps = stamps;
        std::mem::replace(&mut self.sources, sources)
    }

    /// The stamp `source` had when this node last checked it.
    pub fn seen_stamp(&self, source: NodeId) -> Option<u64> {
        let index = self.sources.iter().position(|id| *id == source)?;
        self.source_stamps.get(index).copied()
    }

    /// Forget a source that left the graph. The cache can no longer be
    /// verified against it.
    pub(crate) fn remove_source(&mut self, node_id: NodeId) {
        if let Some(index) = self.sources.iter().position(|id| *id == node_id) {
            self.sources.remove(index);
            if index < self.source_stamps.len() {
                self.source_stamps.remove(index);
            }
            self.mark_failed();
        }
    }

    /// Add a dependent (a warm node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn add_listener(&mut self, subscription: SubscriptionId) {
        if !self.listeners.contains(&subscription) {
            self.listeners.push(subscription);
        }
    }

    pub(crate) fn remove_listener(&mut self, subscription: SubscriptionId) {
        self.listeners.retain(|id| *id != subscription);
    }

    pub fn listeners(&self) -> &[SubscriptionId] {
        &self.listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn cell_node_starts_clean() {
        let node = Node::cell(NodeId::new());
        assert_eq!(node.kind(), NodeKind::Cell);
        assert!(node.is_clean());
        assert!(node.is_evaluated());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::derived(NodeId::new());
        assert_eq!(node.kind(), NodeKind::Derived);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert!(!node.is_evaluated());
        assert!(!node.is_warm());
    }

    #[test]
    fn cells_ignore_dirty_marks() {
        let mut node = Node::cell(NodeId::new());
        node.mark_dirty();
        assert!(node.is_clean());
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = Node::derived(NodeId::new());

        // Start dirty
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        node.record_evaluation(3);
        assert_eq!(node.dirty_state(), DirtyState::Clean);
        assert_eq!(node.verified_at(), 3);

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        // Maybe dirty never downgrades dirty
        node.mark_dirty();
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn failure_is_cleared_by_the_next_evaluation() {
        let mut node = Node::derived(NodeId::new());
        node.record_evaluation(1);

        node.mark_failed();
        assert!(node.is_stale());
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        node.record_evaluation(2);
        assert!(!node.is_stale());
        assert!(node.is_clean());
    }

    #[test]
    fn seen_stamps_follow_their_sources() {
        let mut node = Node::derived(NodeId::new());
        let (a, b) = (NodeId::new(), NodeId::new());
        node.replace_sources(smallvec::smallvec![a, b], smallvec::smallvec![3, 7]);

        assert_eq!(node.seen_stamp(b), Some(7));
        node.remove_source(a);
        assert_eq!(node.seen_stamp(a), None);
        assert_eq!(node.seen_stamp(b), Some(7));
        assert!(node.is_stale());
    }

    #[test]
    fn observer_counting_reports_transitions() {
        let mut node = Node::derived(NodeId::new());

        assert!(node.retain());
        assert!(!node.retain());
        assert_eq!(node.observers(), 2);

        assert!(!node.release());
        assert!(node.release());

        // Releasing past zero is a no-op
        assert!(!node.release());
        assert_eq!(node.observers(), 0);
    }

    #[test]
    fn listeners_are_deduplicated() {
        let mut node = Node::cell(NodeId::new());
        let sub = SubscriptionId::new();

        node.add_listener(sub);
        node.add_listener(sub);
        assert_eq!(node.listeners(), &[sub]);

        node.remove_listener(sub);
        assert!(node.listeners().is_empty());
    }
}
