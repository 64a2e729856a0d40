//! Helpers built on top of the reactive core.
//!
//! - [`snapshot`]: turn a graph of cells and derivations into plain JSON data
//! - [`patch`]: write plain data back through a record's accessor fields

pub mod patch;
pub mod snapshot;

pub use patch::{assign, assign_strict, record_snapshot, DynAccessor, Patch, Record};
pub use snapshot::{to_plain, Snapshot};
