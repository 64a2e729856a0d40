//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, derivations,
//! subscriptions, transactions and keep-alive handles.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state and the only origin of
//! change. Reading a cell while a derivation is evaluated registers the
//! dependency automatically.
//!
//! ## Derivations
//!
//! A [`Derived`] value is computed from other cells and derivations. Its
//! dependencies are rediscovered on every evaluation. It caches its value
//! only while warm, that is while something observes it.
//!
//! ## Subscriptions
//!
//! [`subscribe`] attaches a callback that runs after each settled change;
//! [`keep_alive`] attaches nothing but warmth.
//!
//! ## Transactions
//!
//! [`transact`] batches writes so every affected derivation settles once.
//!
//! # Implementation Notes
//!
//! The graph lives in a thread-local [`Runtime`]. Dependency tracking uses a
//! thread-local stack of evaluator frames ([`ReactiveContext`]).

mod accessor;
mod cell;
mod context;
mod derived;
mod keep_alive;
mod runtime;
mod subscription;
mod transaction;

pub use accessor::{identity_eq, never_eq, value_eq, Accessor, Equality};
pub use cell::Cell;
pub use context::{untracked, ReactiveContext};
pub use derived::Derived;
pub use keep_alive::keep_alive;
pub use runtime::Runtime;
pub use subscription::{subscribe, Subscription, SubscriptionId};
pub use transaction::transact;
