//! Reactive Context
//!
//! The reactive context tracks which derivation is currently being evaluated.
//! This enables automatic dependency tracking: when a cell or derivation is
//! read, it registers itself with the innermost evaluator.
//!
//! # Implementation
//!
//! We use a thread-local stack of evaluator frames. Evaluating a derivation
//! pushes a frame, runs the compute function, and pops the frame again,
//! handing back the dependencies that were read. Edges are collected into
//! the frame and only applied to the graph once evaluation succeeds.
//!
//! Frames nest: a derivation read from inside another derivation's compute
//! function gets its own frame, so edges are always attributed to the
//! innermost evaluator. An untracked frame (see [`untracked`]) shadows the
//! evaluator below it without becoming one.

use std::cell::RefCell;

use crate::graph::{Dependencies, NodeId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The derivation being evaluated; `None` for an untracked scope.
    node: Option<NodeId>,
    /// Nodes read during this evaluation, in first-read order.
    dependencies: Dependencies,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the compute function panics.
pub struct ReactiveContext {
    node: Option<NodeId>,
    active: bool,
}

impl ReactiveContext {
    /// Enter a new evaluation frame for the given derivation.
    ///
    /// While this context is active, any node that is read registers itself
    /// as a dependency of `node`.
    pub fn enter(node: NodeId) -> Self {
        Self::push(Some(node))
    }

    /// Enter a frame in which reads register no dependencies.
    pub fn suspend() -> Self {
        Self::push(None)
    }

    fn push(node: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                node,
                dependencies: Dependencies::new(),
            });
        });

        Self { node, active: true }
    }

    /// Leave the frame, returning the dependencies it collected.
    pub fn finish(mut self) -> Dependencies {
        self.active = false;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right context.
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.node, self.node,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.node, entry.node
            );
        }
        popped
    }

    /// Check if there is any active frame, tracked or not.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The derivation that reads are currently attributed to, if any.
    pub fn current() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.node))
    }

    /// The innermost derivation under evaluation, looking through
    /// untracked frames.
    pub fn evaluating() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().rev().find_map(|entry| entry.node))
    }

    /// Whether `node` is anywhere on the evaluation stack.
    pub fn is_evaluating(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.node == Some(node))
        })
    }

    /// Record a read of `node` in the innermost frame.
    ///
    /// Called by cells and derivations when they are read. Repeated reads
    /// of the same node are recorded once.
    pub fn track_dependency(node: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.node.is_some() && !entry.dependencies.contains(&node) {
                    entry.dependencies.push(node);
                }
            }
        });
    }

    /// Get the dependencies collected in the current frame so far.
    pub fn get_dependencies() -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.active {
            self.pop();
        }
    }
}

/// Run `f` without attributing its reads to the current evaluator.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::suspend();
    f()
}
