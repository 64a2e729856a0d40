//! Transactions.
//!
//! A transaction batches writes: cells change immediately, so reads inside
//! the transaction see the new values, but subscriptions settle only when
//! the outermost transaction closes. Each affected derivation then
//! recomputes at most once, in dependency order, and no subscriber observes
//! a state where only part of the batch has been applied.

use super::runtime::Runtime;
use crate::error::Result;

/// An open batch level. Closing the outermost level settles subscriptions.
///
/// If the guard is dropped without [`Batch::commit`] (the body panicked),
/// the level is closed without settling.
struct Batch {
    open: bool,
}

impl Batch {
    fn begin() -> Self {
        Runtime::begin_batch();
        Self { open: true }
    }

    fn commit(mut self) -> Result<()> {
        self.open = false;
        if Runtime::end_batch() {
            Runtime::settle()
        } else {
            Ok(())
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.open {
            Runtime::end_batch();
        }
    }
}

/// Run `f` as one atomic batch of writes.
///
/// Nested transactions flatten into the outermost one. Failures raised while
/// settling are returned after every subscription has been delivered.
///
/// # Example
///
/// ```rust
/// use rval_core::{transact, Cell};
///
/// let a = Cell::new(1);
/// let b = Cell::new(2);
/// transact(|| -> rval_core::Result<()> {
///     a.set(10)?;
///     b.set(20)?;
///     Ok(())
/// })
/// .unwrap()
/// .unwrap();
/// ```
pub fn transact<R>(f: impl FnOnce() -> R) -> Result<R> {
    let batch = Batch::begin();
    let out = f();
    batch.commit()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{subscribe, Cell, Derived};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn nested_transactions_settle_once_at_the_outermost_close() {
        let a = Cell::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&a, {
            let seen = seen.clone();
            move |v: &i32| seen.borrow_mut().push(*v)
        })
        .unwrap();

        transact(|| {
            a.set(1).unwrap();
            transact(|| a.set(2).unwrap()).unwrap();
            assert!(Runtime::is_batching());
            assert!(seen.borrow().is_empty());
            a.set(3).unwrap();
        })
        .unwrap();

        assert!(!Runtime::is_batching());
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn reads_inside_a_transaction_see_new_values() {
        let a = Cell::new(1);
        let doubled = Derived::new({
            let a = a.clone();
            move || a.get() * 2
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&doubled, {
            let seen = seen.clone();
            move |v: &i32| seen.borrow_mut().push(*v)
        })
        .unwrap();

        transact(|| {
            a.set(5).unwrap();
            assert_eq!(doubled.get().unwrap(), 10);
            assert!(seen.borrow().is_empty());
        })
        .unwrap();

        assert_eq!(*seen.borrow(), vec![10]);
    }

    #[test]
    fn reverted_writes_notify_nobody() {
        let a = Cell::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&a, {
            let seen = seen.clone();
            move |v: &i32| seen.borrow_mut().push(*v)
        })
        .unwrap();

        transact(|| {
            a.set(2).unwrap();
            a.set(1).unwrap();
        })
        .unwrap();

        assert!(seen.borrow().is_empty());
    }

    fn counted_double(a: &Cell<i32>) -> (Derived<i32>, Rc<std::cell::Cell<usize>>) {
        let runs = Rc::new(std::cell::Cell::new(0));
        let doubled = Derived::new({
            let a = a.clone();
            let runs = runs.clone();
            move || {
                runs.set(runs.get() + 1);
                a.get() * 2
            }
        });
        (doubled, runs)
    }

    #[test]
    fn reverted_writes_leave_dependents_cached() {
        let a = Cell::new(1);
        let (doubled, runs) = counted_double(&a);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&doubled, {
            let seen = seen.clone();
            move |v: &i32| seen.borrow_mut().push(*v)
        })
        .unwrap();
        assert_eq!(runs.get(), 1);

        transact(|| -> Result<()> {
            a.set(2)?;
            a.set(1)?;
            Ok(())
        })
        .unwrap()
        .unwrap();

        assert_eq!(doubled.get().unwrap(), 2);
        assert_eq!(runs.get(), 1);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn revert_after_an_intermediate_read_recomputes_once_more() {
        let a = Cell::new(1);
        let (doubled, runs) = counted_double(&a);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&doubled, {
            let seen = seen.clone();
            move |v: &i32| seen.borrow_mut().push(*v)
        })
        .unwrap();

        transact(|| -> Result<()> {
            a.set(2)?;
            assert_eq!(doubled.get()?, 4);
            a.set(1)?;
            Ok(())
        })
        .unwrap()
        .unwrap();

        assert_eq!(doubled.get().unwrap(), 2);
        assert_eq!(runs.get(), 3);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn panicking_body_closes_the_batch() {
        let result = std::panic::catch_unwind(|| {
            transact(|| panic!("boom")).ok();
        });
        assert!(result.is_err());
        assert!(!Runtime::is_batching());
    }
}
