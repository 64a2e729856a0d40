//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, derivations
//! and subscriptions. It owns the dependency graph, decides when a cached
//! value can be trusted, and settles subscriptions after writes.
//!
//! # How It Works
//!
//! 1. Cells and derivations register a node with the runtime when created.
//!
//! 2. Evaluating a derivation collects the nodes it read (see
//!    [`ReactiveContext`]) and hands them to the graph, which rewires edges.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Marks direct dependents dirty and transitive ones maybe-dirty
//!    b. Queues the subscriptions attached anywhere along that path
//!    c. Settles the queue, unless a transaction is open
//!
//! 4. Settling pulls each queued subscription's value. Pulling refreshes
//!    dirty derivations in dependency order, each at most once, so a
//!    subscriber never sees half of a batch.
//!
//! # Thread Model
//!
//! The runtime is thread-local. All graph access happens synchronously on the
//! owning thread; the only deferred work is the grace-window teardown queue,
//! which is swept on top-level reads or by [`Runtime::drain_teardowns`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::context::ReactiveContext;
use super::subscription::SubscriptionId;
use crate::config::EngineConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Dependencies, DirtyState, Node, NodeId, NodeKind, UpdateScheduler};

/// A derivation's evaluation hook, seen through the type erasure of the graph.
pub(crate) trait Computation {
    /// Run the compute function and cache its value.
    fn evaluate(&self) -> Result<Evaluation>;
}

/// Outcome of one successful evaluation.
pub(crate) struct Evaluation {
    pub changed: bool,
    pub sources: Dependencies,
}

/// Pulls a subscription's accessor and delivers the value if it changed.
pub(crate) type Notify = Rc<dyn Fn() -> Result<()>>;

/// What the runtime keeps for an attached subscription.
pub(crate) struct SubscriptionEntry {
    pub node: NodeId,
    pub notify: Option<Notify>,
    /// Keeps the observed accessor alive while attached.
    pub hold: Box<dyn std::any::Any>,
}

struct RuntimeState {
    graph: UpdateScheduler,
    computations: HashMap<NodeId, Weak<dyn Computation>>,
    subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
    pending: IndexSet<SubscriptionId>,
    batch_depth: usize,
    /// Incremented each time an outermost batch opens.
    batch_serial: u64,
    settling: bool,
    config: EngineConfig,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            graph: UpdateScheduler::new(),
            computations: HashMap::new(),
            subscriptions: HashMap::new(),
            pending: IndexSet::new(),
            batch_depth: 0,
            batch_serial: 0,
            settling: false,
            config: EngineConfig::default(),
        }
    }

    fn next_pending(&mut self) -> Option<Notify> {
        while !self.pending.is_empty() {
            let id = self.pending.shift_remove_index(0)?;
            if let Some(notify) = self.subscriptions.get(&id).and_then(|s| s.notify.clone()) {
                return Some(notify);
            }
        }
        None
    }
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::new());
}

/// The thread-local reactive runtime.
///
/// Nothing here needs to be called for ordinary use; cells, derivations and
/// subscriptions talk to the runtime themselves. The public functions expose
/// configuration, teardown control and introspection.
pub struct Runtime;

impl Runtime {
    fn with<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
    }

    /// Install a configuration for this thread's graph.
    pub fn configure(config: EngineConfig) {
        Self::with(|rt| rt.config = config);
    }

    /// The configuration currently installed on this thread.
    pub fn config() -> EngineConfig {
        Self::with(|rt| rt.config.clone())
    }

    /// Number of live nodes on this thread.
    pub fn node_count() -> usize {
        Self::with(|rt| rt.graph.node_count())
    }

    /// Whether a transaction is currently open.
    pub fn is_batching() -> bool {
        Self::with(|rt| rt.batch_depth > 0)
    }

    /// Revision of a node, incremented each time its value changes.
    pub fn revision(node: NodeId) -> Option<u64> {
        Self::with(|rt| rt.graph.get_node(node).map(Node::revision))
    }

    /// Number of observers currently holding a node warm.
    pub fn observer_count(node: NodeId) -> usize {
        Self::with(|rt| rt.graph.get_node(node).map_or(0, Node::observers))
    }

    pub(crate) fn is_warm(node: NodeId) -> bool {
        Self::with(|rt| rt.graph.get_node(node).is_some_and(Node::is_warm))
    }

    pub(crate) fn dirty_state(node: NodeId) -> Option<DirtyState> {
        Self::with(|rt| rt.graph.get_node(node).map(Node::dirty_state))
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_cell(id: NodeId) {
        Self::with(|rt| rt.graph.add_node(Node::cell(id)));
    }

    pub(crate) fn register_derived(id: NodeId, computation: Weak<dyn Computation>) {
        Self::with(|rt| {
            rt.graph.add_node(Node::derived(id));
            rt.computations.insert(id, computation);
        });
    }

    /// Remove a node whose handle was dropped.
    ///
    /// Tolerates thread teardown and a runtime that is already borrowed.
    pub(crate) fn unregister(id: NodeId) {
        let _ = RUNTIME.try_with(|rt| match rt.try_borrow_mut() {
            Ok(mut rt) => {
                rt.computations.remove(&id);
                rt.graph.remove_node(id);
                trace!(node = %id, "node removed");
            }
            Err(_) => warn!(node = %id, "runtime busy, node left registered"),
        });
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Make sure a derivation's cached value is current.
    ///
    /// A cold derivation always recomputes, and so does one whose last
    /// evaluation failed. A warm one that is dirty or maybe-dirty brings its
    /// sources up to date in read order and recomputes as soon as one of
    /// them holds a different value than the one it last saw. If none does
    /// (for instance because a cell was written and then written back inside
    /// a transaction) the cache is kept.
    pub(crate) fn refresh(id: NodeId) -> Result<()> {
        let status = Self::with(|rt| {
            rt.graph.get_node(id).map(|n| {
                (
                    n.kind(),
                    n.is_warm() && n.is_evaluated() && !n.is_stale(),
                    n.dirty_state(),
                )
            })
        });
        let Some((kind, trusted, state)) = status else {
            return Err(ReactiveError::Disposed { node: id });
        };
        if kind == NodeKind::Cell {
            return Ok(());
        }
        if !trusted {
            return Self::recompute(id);
        }
        if state == DirtyState::Clean {
            trace!(node = %id, "cache hit");
            return Ok(());
        }

        let sources: Dependencies = Self::with(|rt| {
            rt.graph
                .get_node(id)
                .map(|n| n.sources().iter().copied().collect())
                .unwrap_or_default()
        });
        for source in sources {
            Self::refresh(source)?;
            if !Self::with(|rt| rt.graph.source_unchanged(id, source)) {
                return Self::recompute(id);
            }
        }
        trace!(node = %id, "sources unchanged");
        Self::with(|rt| rt.graph.mark_verified(id));
        Ok(())
    }

    fn recompute(id: NodeId) -> Result<()> {
        let computation = Self::with(|rt| rt.computations.get(&id).and_then(Weak::upgrade))
            .ok_or(ReactiveError::Disposed { node: id })?;

        debug!(node = %id, "recomputing");
        match computation.evaluate() {
            Ok(Evaluation { changed, sources }) => {
                Self::with(|rt| rt.graph.complete_evaluation(id, sources, changed));
                Ok(())
            }
            Err(err) => {
                debug!(node = %id, error = %err, "evaluation failed");
                Self::with(|rt| {
                    if let Some(node) = rt.graph.get_node_mut(id) {
                        node.mark_failed();
                    }
                });
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Writes and settlement
    // ------------------------------------------------------------------

    /// Propagate a cell change and settle unless a transaction is open.
    ///
    /// `restored` is the stamp the cell had when the current transaction
    /// opened, passed when the write put back the value it had then.
    pub(crate) fn cell_changed(id: NodeId, restored: Option<u64>) -> Result<()> {
        let settle_now = Self::with(|rt| {
            let touched = rt.graph.mark_changed(id);
            if let Some(stamp) = restored {
                trace!(cell = %id, "cell back at its value from the start of the transaction");
                rt.graph.restore_stamp(id, stamp);
            }
            for node_id in touched {
                if let Some(node) = rt.graph.get_node(node_id) {
                    rt.pending.extend(node.listeners().iter().copied());
                }
            }
            rt.batch_depth == 0
        });
        if settle_now {
            Self::settle()
        } else {
            Ok(())
        }
    }

    /// Deliver every queued subscription.
    ///
    /// Writes made by callbacks queue more subscriptions, which are handled
    /// by the same pass. The first failure is returned once the queue is
    /// empty; the remaining subscriptions are still delivered.
    pub(crate) fn settle() -> Result<()> {
        let start = Self::with(|rt| {
            if rt.settling || rt.batch_depth > 0 || rt.pending.is_empty() {
                false
            } else {
                rt.settling = true;
                true
            }
        });
        if !start {
            return Ok(());
        }

        let _guard = SettleGuard;
        let mut delivered = 0usize;
        let mut first_error = None;
        while let Some(notify) = Self::with(RuntimeState::next_pending) {
            delivered += 1;
            if let Err(err) = notify() {
                warn!(error = %err, "subscription failed during settlement");
                first_error.get_or_insert(err);
            }
        }
        debug!(delivered, "settled");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn begin_batch() {
        Self::with(|rt| {
            if rt.batch_depth == 0 {
                rt.batch_serial += 1;
            }
            rt.batch_depth += 1;
        });
    }

    /// Serial number of the open outermost batch, if any.
    pub(crate) fn current_batch() -> Option<u64> {
        Self::with(|rt| (rt.batch_depth > 0).then_some(rt.batch_serial))
    }

    /// Stamp identifying a node's current value.
    pub(crate) fn change_stamp(node: NodeId) -> u64 {
        Self::with(|rt| rt.graph.change_stamp(node).unwrap_or_default())
    }

    /// Close a batch level. Returns true when the outermost level closed.
    pub(crate) fn end_batch() -> bool {
        Self::with(|rt| {
            rt.batch_depth = rt.batch_depth.saturating_sub(1);
            rt.batch_depth == 0
        })
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub(crate) fn attach(id: SubscriptionId, entry: SubscriptionEntry) {
        Self::with(|rt| {
            let node = entry.node;
            rt.graph.acquire(node);
            if entry.notify.is_some() {
                if let Some(node) = rt.graph.get_node_mut(node) {
                    node.add_listener(id);
                }
            }
            rt.subscriptions.insert(id, entry);
            trace!(subscription = ?id, node = %node, "subscription attached");
        });
    }

    /// Detach a subscription, deferring the observed node's cold transition
    /// by the configured grace window. Detaching twice is a no-op.
    pub(crate) fn detach(id: SubscriptionId) {
        let entry = RUNTIME.try_with(|rt| {
            let mut rt = rt.try_borrow_mut().ok()?;
            let entry = rt.subscriptions.remove(&id)?;
            rt.pending.shift_remove(&id);
            if let Some(node) = rt.graph.get_node_mut(entry.node) {
                node.remove_listener(id);
            }
            let deadline = Instant::now() + rt.config.grace_window;
            rt.graph.relinquish(entry.node, Some(deadline));
            trace!(subscription = ?id, node = %entry.node, "subscription detached");
            Some(entry)
        });
        // The entry may hold the last handle to a derivation, whose drop
        // re-enters the runtime, so it is released outside the borrow.
        drop(entry);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Let every derivation whose grace window has elapsed go cold.
    pub fn sweep_teardowns() -> usize {
        let now = Instant::now();
        Self::with(|rt| rt.graph.sweep_teardowns(now))
    }

    /// Let every derivation waiting out a grace window go cold now.
    pub fn flush_teardowns() -> usize {
        Self::with(|rt| rt.graph.flush_teardowns())
    }

    /// Number of derivations waiting out a grace window.
    pub fn pending_teardowns() -> usize {
        Self::with(|rt| rt.graph.pending_teardowns())
    }

    /// When the earliest pending grace window ends.
    pub fn next_teardown_deadline() -> Option<Instant> {
        Self::with(|rt| rt.graph.next_teardown())
    }

    /// Wait until every pending grace window has elapsed, applying each
    /// teardown as it comes due.
    pub async fn drain_teardowns() {
        while let Some(deadline) = Self::next_teardown_deadline() {
            tokio::time::sleep_until(deadline).await;
            Self::sweep_teardowns();
        }
    }

    /// Sweep expired teardowns unless called from inside an evaluation.
    pub(crate) fn sweep_if_idle() {
        if !ReactiveContext::is_active() {
            Self::sweep_teardowns();
        }
    }
}

/// Clears the settling flag even if a callback panics.
struct SettleGuard;

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let _ = RUNTIME.try_with(|rt| {
            if let Ok(mut rt) = rt.try_borrow_mut() {
                rt.settling = false;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cell, Derived};

    #[test]
    fn nodes_register_and_unregister() {
        let before = Runtime::node_count();
        let cell = Cell::new(1);
        let derived = Derived::new(|| 2);
        assert_eq!(Runtime::node_count(), before + 2);

        drop(cell);
        drop(derived);
        assert_eq!(Runtime::node_count(), before);
    }

    #[test]
    fn configure_is_per_thread() {
        let config = EngineConfig::default().with_grace_window(std::time::Duration::from_secs(3));
        Runtime::configure(config.clone());
        assert_eq!(Runtime::config(), config);

        let other = std::thread::spawn(Runtime::config).join().unwrap();
        assert_eq!(other, EngineConfig::default());
    }

    #[test]
    fn revision_counts_changes_only() {
        let cell = Cell::new(1);
        let id = crate::Accessor::node_id(&cell);
        assert_eq!(Runtime::revision(id), Some(0));

        cell.set(1).unwrap();
        assert_eq!(Runtime::revision(id), Some(0));

        cell.set(2).unwrap();
        assert_eq!(Runtime::revision(id), Some(1));
    }

    #[test]
    fn refresh_of_unknown_node_reports_disposed() {
        let id = NodeId::new();
        assert!(matches!(
            Runtime::refresh(id),
            Err(ReactiveError::Disposed { node }) if node == id
        ));
    }
}
