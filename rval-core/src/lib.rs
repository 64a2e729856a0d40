//! RVal Core
//!
//! This crate provides a fine-grained reactive value engine. It implements:
//!
//! - Reactive primitives (cells, derivations, subscriptions, keep-alive)
//! - Incremental recomputation with automatic dependency discovery
//! - Atomic transactions over any number of writes
//! - Deep snapshots, bulk patching and model reconciliation over JSON
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Dependency graph, dirty states and teardown scheduling
//! - `utils`: Snapshot and patch helpers built on the accessor protocol
//! - `model`: Identity-preserving reconciliation of plain objects
//! - `config`: Engine tunables
//! - `error`: The crate-wide error type
//!
//! Every reactive graph is confined to the thread that created it.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use rval_core::prelude::*;
//!
//! // Create a cell
//! let count = Cell::new(0);
//!
//! // Create a derived value
//! let doubled = Derived::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Subscribe to it
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _sub = subscribe(&doubled, {
//!     let log = log.clone();
//!     move |v: &i32| log.borrow_mut().push(*v)
//! })
//! .unwrap();
//!
//! // Update the cell
//! count.set(5).unwrap();
//! assert_eq!(*log.borrow(), vec![10]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod reactive;
pub mod utils;

pub use config::{EngineConfig, DEFAULT_GRACE_WINDOW};
pub use error::{BoxError, ReactiveError, Result};
pub use model::{Instance, Model, ModelInput};
pub use reactive::{
    identity_eq, keep_alive, never_eq, subscribe, transact, untracked, value_eq, Accessor,
    Cell, Derived, Equality, ReactiveContext, Runtime, Subscription, SubscriptionId,
};
pub use utils::{assign, assign_strict, record_snapshot, to_plain, DynAccessor, Patch, Record, Snapshot};

/// Commonly used items.
pub mod prelude {
    pub use crate::error::{ReactiveError, Result};
    pub use crate::reactive::{
        keep_alive, subscribe, transact, untracked, Accessor, Cell, Derived, Runtime,
        Subscription,
    };
    pub use crate::utils::{assign, to_plain, DynAccessor, Record, Snapshot};
}
