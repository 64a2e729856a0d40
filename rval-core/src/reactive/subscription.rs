//! Subscriptions.
//!
//! A Subscription attaches an observer to an accessor. Attaching warms the
//! accessor and, transitively, every derivation it depends on. The callback
//! runs during settlement, once per batch, and only when the value differs
//! from the last one the subscription saw.
//!
//! Disposal is idempotent. The observed derivation stays warm for the
//! configured grace window after the last subscription leaves, so a
//! replacement that attaches quickly inherits the cache untouched.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::accessor::Accessor;
use super::context::untracked;
use super::runtime::{Notify, Runtime, SubscriptionEntry};
use crate::error::Result;
use crate::graph::NodeId;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an attached subscription.
///
/// Dropping the handle disposes the subscription. Use [`Subscription::leak`]
/// to keep it attached for the rest of the thread's life.
///
/// The handle belongs to the thread whose runtime it is attached to and
/// cannot be sent elsewhere:
///
/// ```rust,compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<rval_core::Subscription>();
/// ```
#[must_use = "dropping a Subscription disposes it immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    node: NodeId,
    disposed: std::cell::Cell<bool>,
    _not_send: PhantomData<Rc<()>>,
}

impl Subscription {
    pub(crate) fn attach<T, A>(accessor: &A, notify: Option<Notify>) -> Self
    where
        A: Accessor<T> + Clone + 'static,
    {
        let id = SubscriptionId::new();
        let node = accessor.node_id();
        Runtime::attach(
            id,
            SubscriptionEntry {
                node,
                notify,
                hold: Box::new(accessor.clone()),
            },
        );
        Self {
            id,
            node,
            disposed: std::cell::Cell::new(false),
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The node this subscription observes.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Detach the subscription. Calling this more than once has no effect.
    pub fn dispose(&self) {
        if !self.disposed.replace(true) {
            Runtime::detach(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Keep the subscription attached without holding the handle.
    pub fn leak(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Subscribe to changes of an accessor.
///
/// The accessor is evaluated once to establish a baseline; a failure there is
/// returned and nothing stays attached. `callback` is not called for the
/// baseline. Afterwards it is called with each settled value that differs
/// from the last one delivered.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use rval_core::{subscribe, Cell};
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let cell = Cell::new(1);
/// let _sub = subscribe(&cell, {
///     let seen = seen.clone();
///     move |v: &i32| seen.borrow_mut().push(*v)
/// })
/// .unwrap();
///
/// cell.set(2).unwrap();
/// cell.set(2).unwrap();
/// assert_eq!(*seen.borrow(), vec![2]);
/// ```
pub fn subscribe<T, A, F>(accessor: &A, callback: F) -> Result<Subscription>
where
    T: Clone + 'static,
    A: Accessor<T> + Clone + 'static,
    F: FnMut(&T) + 'static,
{
    let last: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let callback = RefCell::new(callback);
    let notify: Notify = Rc::new({
        let accessor = accessor.clone();
        let last = last.clone();
        move || {
            let value = untracked(|| accessor.read())?;
            let changed = match last.borrow().as_ref() {
                Some(previous) => !accessor.same(previous, &value),
                None => true,
            };
            if changed {
                *last.borrow_mut() = Some(value.clone());
                if let Ok(mut callback) = callback.try_borrow_mut() {
                    (*callback)(&value);
                }
            }
            Ok(())
        }
    });

    let subscription = Subscription::attach::<T, A>(accessor, Some(notify));
    // On failure the handle is dropped here, which detaches it again.
    let baseline = untracked(|| accessor.read())?;
    *last.borrow_mut() = Some(baseline);
    Ok(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{transact, Cell, Derived};
    use crate::ReactiveError;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(&T) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &T| sink.borrow_mut().push(v.clone()))
    }

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn subscribing_warms_the_chain() {
        let cell = Cell::new(1);
        let inner = Derived::new({
            let cell = cell.clone();
            move || cell.get() + 1
        });
        let outer = Derived::new({
            let inner = inner.clone();
            move || inner.get().unwrap_or_default() * 10
        });

        let (seen, sink) = recorder::<i32>();
        let sub = subscribe(&outer, sink).unwrap();
        assert!(outer.is_warm());
        assert!(inner.is_warm());
        assert_eq!(Runtime::observer_count(inner.id()), 1);

        cell.set(2).unwrap();
        assert_eq!(*seen.borrow(), vec![30]);

        sub.dispose();
        Runtime::flush_teardowns();
        assert!(!outer.is_warm());
        assert!(!inner.is_warm());
    }

    #[test]
    fn dispose_is_idempotent() {
        let cell = Cell::new(0);
        let (seen, sink) = recorder::<i32>();
        let sub = subscribe(&cell, sink).unwrap();

        sub.dispose();
        sub.dispose();
        assert!(sub.is_disposed());

        cell.set(1).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn callback_skips_values_equal_to_the_last_delivered() {
        let cell = Cell::new(1);
        let parity = Derived::new({
            let cell = cell.clone();
            move || cell.get() % 2
        });
        let (seen, sink) = recorder::<i32>();
        let _sub = subscribe(&parity, sink).unwrap();

        cell.set(3).unwrap();
        cell.set(4).unwrap();
        cell.set(6).unwrap();
        cell.set(7).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 1]);
    }

    #[test]
    fn failed_baseline_leaves_nothing_attached() {
        let failing: Derived<i32> = Derived::try_new(|| Err(ReactiveError::failed("nope")));

        assert!(subscribe(&failing, |_: &i32| {}).is_err());
        assert_eq!(Runtime::observer_count(failing.id()), 0);
    }

    #[test]
    fn settlement_failures_reach_the_writer() {
        let cell = Cell::new(1);
        let checked = Derived::try_new({
            let cell = cell.clone();
            move || match cell.get() {
                0 => Err(ReactiveError::failed("zero")),
                v => Ok(100 / v),
            }
        });
        let (seen, sink) = recorder::<i32>();
        let _sub = subscribe(&checked, sink).unwrap();

        assert!(cell.set(0).is_err());
        // The write itself still happened
        assert_eq!(cell.get(), 0);

        cell.set(4).unwrap();
        assert_eq!(*seen.borrow(), vec![25]);
    }

    #[test]
    fn callbacks_may_write_other_cells() {
        let source = Cell::new(1);
        let mirror = Cell::new(0);
        let _sub = subscribe(&source, {
            let mirror = mirror.clone();
            move |v: &i32| {
                let _ = mirror.set(*v * 2);
            }
        })
        .unwrap();

        let (seen, sink) = recorder::<i32>();
        let _mirror_sub = subscribe(&mirror, sink).unwrap();

        transact(|| source.set(5)).unwrap().unwrap();
        assert_eq!(mirror.get(), 10);
        assert_eq!(*seen.borrow(), vec![10]);
    }
}
