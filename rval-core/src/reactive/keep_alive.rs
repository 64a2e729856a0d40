//! Keep-alive handles.
//!
//! A keep-alive is a subscription without a callback. It holds a derivation
//! (and everything it depends on) warm so plain reads are served from the
//! cache instead of recomputing. It never evaluates anything by itself: a
//! derivation held only by keep-alives stays dirty after upstream writes
//! until somebody reads it.
//!
//! Disposing the handle starts the grace window. A subscription or
//! keep-alive attaching within the window takes over the existing cache and
//! wiring; otherwise the derivation goes cold once the window has elapsed
//! and the next top-level read (or
//! [`Runtime::drain_teardowns`](crate::Runtime::drain_teardowns)) notices.

use super::accessor::Accessor;
use super::subscription::Subscription;

/// Keep `accessor` warm until the returned handle is disposed or dropped.
pub fn keep_alive<T, A>(accessor: &A) -> Subscription
where
    A: Accessor<T> + Clone + 'static,
{
    Subscription::attach::<T, A>(accessor, None)
}
