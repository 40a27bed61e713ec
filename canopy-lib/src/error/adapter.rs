//! Tree widget adapter error types

use crate::model::NodeId;

/// Errors reported by a rendering adapter.
///
/// Either variant means the adapter's view of a subtree can no longer be
/// repaired incrementally; the caller rebuilds the subtree instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// A node with this id is already present in the adapter.
    #[error("Node {0} already exists in the adapter")]
    IdCollision(NodeId),

    /// The adapter's structure disagrees with the requested mutation.
    #[error("Structural mismatch at {id}: {reason}")]
    StructuralMismatch {
        /// Node the mutation targeted.
        id: NodeId,
        /// What the adapter found instead.
        reason: String,
    },
}

impl AdapterError {
    /// Creates a new structural mismatch error.
    pub fn mismatch(id: NodeId, reason: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            id,
            reason: reason.into(),
        }
    }
}
