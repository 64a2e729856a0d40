//! Error types shared by every reactive operation.
//!
//! All errors surface synchronously to the caller of `get`, `set`,
//! `transact` or `subscribe`. The engine never retries and never swallows a
//! failure; a derivation that failed stays dirty and retries on its next read.

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed cause carried by [`ReactiveError::EvaluationFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A write was attempted on a derivation that has no setter.
    #[error("node {node} is read-only")]
    Unwritable { node: NodeId },

    /// A compute or setter function failed.
    #[error("evaluation failed: {source}")]
    EvaluationFailure { source: BoxError },

    /// A cell was written while a derivation was being evaluated.
    #[error("cannot write node {node} while node {evaluating} is being evaluated")]
    ReentrantWrite { node: NodeId, evaluating: NodeId },

    /// A derivation read itself, directly or through other derivations.
    #[error("dependency cycle detected at node {node}")]
    Cycle { node: NodeId },

    /// The node behind a handle is no longer registered.
    #[error("node {node} has been disposed")]
    Disposed { node: NodeId },

    /// A named field failed while being written or snapshotted.
    #[error("field '{key}': {source}")]
    Field {
        key: String,
        source: Box<ReactiveError>,
    },

    #[error("not an assignable property: {key}")]
    NotAssignable { key: String },

    #[error("model expects null or an object, got {0}")]
    ModelInput(String),

    #[error("attribute '{key}' is required")]
    MissingKey { key: String },

    #[error("factory mismatch: instance belongs to a different model")]
    ModelMismatch,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Wrap an arbitrary failure raised by a compute or setter function.
    pub fn failed(cause: impl Into<BoxError>) -> Self {
        Self::EvaluationFailure {
            source: cause.into(),
        }
    }

    /// Attach a field name to an error.
    pub fn in_field(self, key: impl Into<String>) -> Self {
        Self::Field {
            key: key.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_wraps_any_error() {
        let err = ReactiveError::failed("boom");
        assert!(matches!(err, ReactiveError::EvaluationFailure { .. }));
        assert_eq!(err.to_string(), "evaluation failed: boom");
    }

    #[test]
    fn field_errors_name_the_key() {
        let err = ReactiveError::NotAssignable { key: "bla".into() }.in_field("todo");
        assert_eq!(err.to_string(), "field 'todo': not an assignable property: bla");
        assert!(std::error::Error::source(&err).is_some());
    }
}
