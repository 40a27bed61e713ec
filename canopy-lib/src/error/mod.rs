//! Error types

mod adapter;
mod fetch;

pub use adapter::*;
pub use fetch::*;

use crate::model::NodeId;

/// Top-level error for tree operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A snapshot fetch failed. The tree keeps its last known-good state.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The adapter rejected a mutation even after a subtree rebuild.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The node is not in the tree.
    #[error("Node not in tree: {0}")]
    NodeNotFound(NodeId),

    /// The node cannot own children.
    #[error("Node {0} cannot have children")]
    NotExpandable(NodeId),

    /// The node has no pagination state to advance.
    #[error("Node {0} has no pages to load")]
    NotPageable(NodeId),

    /// The fixture or snapshot payload is malformed.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
