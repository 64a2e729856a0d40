//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! cells and derivations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent cells or derivations
//! - Forward edges ("sources") record what a derivation read during its
//!   last evaluation
//! - Reverse edges ("dependents") exist only while the reader is warm
//!
//! When a cell changes, we traverse the dependents to find all affected
//! nodes and mark them as dirty. Whether a dirty node actually recomputes is
//! decided when it is next read.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena keyed by [`NodeId`]. Edges are ids, never
//!    owning references, so a cell's dependents cannot keep a derivation
//!    alive, and a dropped derivation simply leaves the arena.
//!
//! 2. The arena stores only bookkeeping. Values stay in the typed handles.

mod node;
mod scheduler;

pub use node::{Dependencies, DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
