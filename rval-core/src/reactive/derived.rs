//! Derived Implementation
//!
//! A Derived is a computed value whose dependencies are discovered by
//! running its compute function.
//!
//! # How Derivations Work
//!
//! 1. Nothing runs on creation. The first read evaluates the compute
//!    function inside a [`ReactiveContext`] frame, recording every cell and
//!    derivation it reads.
//!
//! 2. The recorded set replaces the previous one. Stale edges from an
//!    earlier evaluation are dropped, so a branch that is no longer taken
//!    stops triggering recomputation.
//!
//! 3. While warm (held by a subscription, a keep-alive handle, or a warm
//!    dependent) the graph keeps edges to the sources and a clean
//!    derivation serves reads from its cache.
//!
//! 4. While cold nothing tells the derivation about upstream writes, so
//!    every read recomputes. Caching is earned by being observed.
//!
//! # Failures
//!
//! If the compute function fails, the error reaches the caller of `get`, the
//! previous cached value is kept, and the derivation stays dirty so the next
//! read tries again.

use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::accessor::{value_eq, Accessor, Equality};
use super::context::ReactiveContext;
use super::runtime::{Computation, Evaluation, Runtime};
use super::transaction::transact;
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, NodeId};

type Compute<T> = Box<dyn Fn() -> Result<T>>;
type Setter<T> = Box<dyn Fn(T) -> Result<()>>;

struct DerivedInner<T> {
    id: NodeId,
    compute: Compute<T>,
    setter: Option<Setter<T>>,
    value: std::cell::RefCell<Option<T>>,
    equals: Equality<T>,
}

impl<T: Clone + 'static> Computation for DerivedInner<T> {
    fn evaluate(&self) -> Result<Evaluation> {
        if ReactiveContext::is_evaluating(self.id) {
            return Err(ReactiveError::Cycle { node: self.id });
        }

        let ctx = ReactiveContext::enter(self.id);
        let result = (self.compute)();
        let sources = ctx.finish();
        let value = result?;

        let mut cached = self.value.borrow_mut();
        let changed = match cached.as_ref() {
            Some(previous) => !(self.equals)(previous, &value),
            None => true,
        };
        if changed {
            *cached = Some(value);
        }
        Ok(Evaluation { changed, sources })
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A computed value that caches its result while observed.
///
/// # Example
///
/// ```rust
/// use rval_core::{Cell, Derived};
///
/// let count = Cell::new(2);
/// let doubled = Derived::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a derivation from an infallible compute function.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Box::new(move || Ok(compute())), None, value_eq)
    }

    /// Create a derivation whose compute function may fail.
    ///
    /// Errors from reading other derivations can be propagated with `?`.
    pub fn try_new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::build(Box::new(compute), None, value_eq)
    }

    /// Create a writable derivation. Writes are handed to `setter`, which may
    /// write any other accessors.
    pub fn with_setter<F, S>(compute: F, setter: S) -> Self
    where
        F: Fn() -> T + 'static,
        S: Fn(T) -> Result<()> + 'static,
    {
        Self::build(
            Box::new(move || Ok(compute())),
            Some(Box::new(setter)),
            value_eq,
        )
    }
}

impl<T> Derived<T>
where
    T: Clone + 'static,
{
    /// Create a derivation with an explicit equality policy, used to decide
    /// whether a recomputation changed the value.
    pub fn with_equality<F>(compute: F, equals: Equality<T>) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::build(Box::new(compute), None, equals)
    }

    fn build(compute: Compute<T>, setter: Option<Setter<T>>, equals: Equality<T>) -> Self {
        let inner = Rc::new(DerivedInner {
            id: NodeId::new(),
            compute,
            setter,
            value: std::cell::RefCell::new(None),
            equals,
        });
        let weak: Weak<DerivedInner<T>> = Rc::downgrade(&inner);
        Runtime::register_derived(inner.id, weak);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> Result<T> {
        Runtime::sweep_if_idle();
        ReactiveContext::track_dependency(self.inner.id);
        Runtime::refresh(self.inner.id)?;
        self.inner
            .value
            .borrow()
            .clone()
            .ok_or(ReactiveError::Disposed { node: self.inner.id })
    }

    /// Hand a value to the setter.
    ///
    /// The setter runs inside a transaction, so everything it writes settles
    /// together.
    pub fn set(&self, value: T) -> Result<()> {
        let setter = self
            .inner
            .setter
            .as_ref()
            .ok_or(ReactiveError::Unwritable { node: self.inner.id })?;
        transact(|| setter(value))?
    }

    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// Whether the derivation is currently warm (its cache is trusted).
    pub fn is_warm(&self) -> bool {
        Runtime::is_warm(self.inner.id)
    }

    /// Current dirty state.
    pub fn state(&self) -> DirtyState {
        Runtime::dirty_state(self.inner.id).unwrap_or(DirtyState::Dirty)
    }

    /// Check if the derivation has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }
}

impl<T: Clone + 'static> Accessor<T> for Derived<T> {
    fn read(&self) -> Result<T> {
        self.get()
    }

    fn write(&self, value: T) -> Result<()> {
        self.set(value)
    }

    fn is_writable(&self) -> bool {
        Derived::is_writable(self)
    }

    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn same(&self, a: &T, b: &T) -> bool {
        (self.inner.equals)(a, b)
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .field("state", &self.state())
            .field("warm", &self.is_warm())
            .finish()
    }
}
