//! Property tests for write propagation.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use rval_core::{keep_alive, subscribe, transact, Cell, Derived};

proptest! {
    #[test]
    fn last_write_wins(writes in prop::collection::vec(any::<i64>(), 1..32)) {
        let cell = Cell::new(0_i64);
        for &v in &writes {
            cell.set(v).unwrap();
        }
        prop_assert_eq!(cell.get(), *writes.last().unwrap());
    }

    #[test]
    fn transaction_notifies_at_most_once(
        initial in -4_i32..4,
        writes in prop::collection::vec(-4_i32..4, 0..16),
    ) {
        let cell = Cell::new(initial);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&cell, {
            let seen = seen.clone();
            move |v: &i32| seen.borrow_mut().push(*v)
        })
        .unwrap();

        transact(|| -> rval_core::Result<()> {
            for &v in &writes {
                cell.set(v)?;
            }
            Ok(())
        })
        .unwrap()
        .unwrap();

        let last = writes.last().copied().unwrap_or(initial);
        let expected = if last == initial { vec![] } else { vec![last] };
        prop_assert_eq!(seen.borrow().clone(), expected);
    }

    #[test]
    fn warm_derivation_matches_fresh_computation(
        writes in prop::collection::vec((any::<bool>(), -100_i32..100), 0..24),
    ) {
        let a = Cell::new(0);
        let b = Cell::new(0);
        let sum = Derived::new({
            let (a, b) = (a.clone(), b.clone());
            move || a.get() + b.get()
        });
        let _alive = keep_alive(&sum);

        for (to_a, v) in writes {
            if to_a {
                a.set(v).unwrap();
            } else {
                b.set(v).unwrap();
            }
            prop_assert_eq!(sum.get().unwrap(), a.get() + b.get());
        }
    }
}
