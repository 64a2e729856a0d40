//! Cell Implementation
//!
//! A Cell is the leaf reactive primitive. It holds a value, and it is the
//! only kind of node that originates change.
//!
//! # How Cells Work
//!
//! 1. Reading a cell while a derivation is being evaluated records the cell
//!    as one of that derivation's sources.
//!
//! 2. Writing a value that differs from the current one (under the cell's
//!    equality policy) stores it, bumps the cell's revision and marks every
//!    warm dependent dirty.
//!
//! 3. Outside a transaction the write settles subscriptions before
//!    returning; inside one, settlement waits for the outermost scope to
//!    close.
//!
//! Writing a cell from inside a compute function is rejected with
//! [`ReactiveError::ReentrantWrite`].
//!
//! A cell that ends up back at the value it had when the transaction opened
//! counts as unchanged: dependents that did not read it in between keep
//! their caches.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

use super::accessor::{value_eq, Accessor, Equality};
use super::context::ReactiveContext;
use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equals: Equality<T>,
    baseline: RefCell<Option<Baseline<T>>>,
}

/// The value a cell had before its first write in a transaction.
struct Baseline<T> {
    batch: u64,
    value: T,
    stamp: u64,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A reactive cell holding a value of type `T`.
///
/// Clones share the same cell.
///
/// # Example
///
/// ```rust
/// use rval_core::Cell;
///
/// let count = Cell::new(0);
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, value_eq)
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Create a cell that uses `equals` to decide whether a write changes it.
    pub fn with_equality(value: T, equals: Equality<T>) -> Self {
        let id = NodeId::new();
        Runtime::register_cell(id);
        Self {
            inner: Rc::new(CellInner {
                id,
                value: RefCell::new(value),
                equals,
                baseline: RefCell::new(None),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called while a derivation is being evaluated, this also records
    /// the cell as one of its sources.
    pub fn get(&self) -> T {
        ReactiveContext::track_dependency(self.inner.id);
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Set a new value and propagate the change.
    ///
    /// Writing an equal value is a no-op. Errors from subscriptions settled
    /// by this write are returned after the value has been stored.
    pub fn set(&self, value: T) -> Result<()> {
        if let Some(evaluating) = ReactiveContext::evaluating() {
            return Err(ReactiveError::ReentrantWrite {
                node: self.inner.id,
                evaluating,
            });
        }

        let batch = Runtime::current_batch();
        let restored = {
            let mut current = self.inner.value.borrow_mut();
            if (self.inner.equals)(&current, &value) {
                return Ok(());
            }

            let mut baseline = self.inner.baseline.borrow_mut();
            match batch {
                Some(batch) if baseline.as_ref().map_or(true, |b| b.batch != batch) => {
                    *baseline = Some(Baseline {
                        batch,
                        value: current.clone(),
                        stamp: Runtime::change_stamp(self.inner.id),
                    });
                }
                Some(_) => {}
                None => *baseline = None,
            }
            *current = value;

            let restored = baseline
                .as_ref()
                .filter(|b| (self.inner.equals)(&b.value, &current))
                .map(|b| b.stamp);
            restored
        };
        trace!(cell = %self.inner.id, "cell written");

        Runtime::cell_changed(self.inner.id, restored)
    }

    /// Update the value using a function of the current one.
    ///
    /// `f` sees a copy, so it may itself write this cell; its result is
    /// written afterwards and wins.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        self.set(f(&current))
    }

    /// Number of times the value has changed.
    pub fn revision(&self) -> u64 {
        Runtime::revision(self.inner.id).unwrap_or(0)
    }
}

impl<T: Clone + 'static> Accessor<T> for Cell<T> {
    fn read(&self) -> Result<T> {
        Ok(self.get())
    }

    fn write(&self, value: T) -> Result<()> {
        self.set(value)
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn same(&self, a: &T, b: &T) -> bool {
        (self.inner.equals)(a, b)
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
