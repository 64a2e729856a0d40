//! The accessor protocol.
//!
//! Cells and derivations share one calling convention: `read` returns the
//! current value (registering a dependency when called during an evaluation),
//! `write` stores a new one. A derivation without a setter refuses writes
//! with [`ReactiveError::Unwritable`](crate::ReactiveError::Unwritable).

use std::rc::Rc;

use crate::error::Result;
use crate::graph::NodeId;

/// Equality policy deciding whether a write or recomputation changed a value.
pub type Equality<T> = fn(&T, &T) -> bool;

/// Read/write capability shared by [`Cell`](crate::Cell) and
/// [`Derived`](crate::Derived).
pub trait Accessor<T> {
    /// Read the current value, tracking the read if a derivation is being
    /// evaluated.
    fn read(&self) -> Result<T>;

    /// Write a new value.
    fn write(&self, value: T) -> Result<()>;

    /// Whether `write` can succeed at all.
    fn is_writable(&self) -> bool;

    /// The graph node behind this accessor.
    fn node_id(&self) -> NodeId;

    /// Whether two values are the same under this accessor's equality policy.
    fn same(&self, a: &T, b: &T) -> bool;
}

/// Value equality. The default policy.
pub fn value_eq<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Identity equality for shared values: two `Rc`s are the same only if they
/// point at the same allocation.
pub fn identity_eq<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::ptr_eq(a, b)
}

/// Treat every write and every recomputation as a change.
pub fn never_eq<T>(_: &T, _: &T) -> bool {
    false
}
