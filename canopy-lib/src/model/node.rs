//! Node snapshots and materialized nodes.

use serde::Deserialize;
use serde::Serialize;

use super::NodeId;
use super::Status;

/// Kind-specific attributes of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Record {
        #[serde(default)]
        reference_code: Option<String>,
        /// Description level, e.g. `file` or `item`.
        #[serde(default)]
        level: Option<String>,
    },
    StructureUnit {
        #[serde(default)]
        reference_code: Option<String>,
        /// Id of the classification structure this unit belongs to.
        structure: String,
    },
    Archive {
        #[serde(default)]
        reference_code: Option<String>,
    },
    Agent {
        #[serde(default)]
        role: Option<String>,
    },
    Step {
        status: Status,
    },
    Task {
        status: Status,
        #[serde(default)]
        responsible: Option<String>,
    },
    SeeMorePlaceholder,
    LoadingPlaceholder,
    /// Synthetic owner of the top level.
    #[serde(skip)]
    Root,
}

impl NodeKind {
    /// Returns `true` if this kind is valid for the given id.
    pub fn matches(&self, id: &NodeId) -> bool {
        matches!(
            (self, id),
            (Self::Record { .. }, NodeId::Record(_))
                | (Self::StructureUnit { .. }, NodeId::Unit(_))
                | (Self::Archive { .. }, NodeId::Archive(_))
                | (Self::Agent { .. }, NodeId::Agent(_))
                | (Self::Step { .. }, NodeId::Step(_))
                | (Self::Task { .. }, NodeId::Task(_))
                | (Self::SeeMorePlaceholder, NodeId::SeeMore(_))
                | (Self::LoadingPlaceholder, NodeId::Loading(_))
                | (Self::Root, NodeId::Root)
        )
    }

    /// Workflow status, for status-bearing kinds.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Step { status } | Self::Task { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Reference code, for archival kinds.
    pub fn reference_code(&self) -> Option<&str> {
        match self {
            Self::Record { reference_code, .. }
            | Self::StructureUnit { reference_code, .. }
            | Self::Archive { reference_code } => reference_code.as_deref(),
            _ => None,
        }
    }
}

/// A node as returned by a snapshot fetch.
///
/// Snapshots never carry children, pagination state or UI flags, so
/// reconciling one into the tree cannot clobber any of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    pub label: String,
    /// Structural parent (id only).
    #[serde(default)]
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl NodeData {
    pub fn record(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(
            NodeId::record(key),
            label,
            NodeKind::Record {
                reference_code: None,
                level: None,
            },
        )
    }

    pub fn unit(
        key: impl Into<String>,
        label: impl Into<String>,
        structure: impl Into<String>,
    ) -> Self {
        Self::new(
            NodeId::unit(key),
            label,
            NodeKind::StructureUnit {
                reference_code: None,
                structure: structure.into(),
            },
        )
    }

    pub fn archive(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(
            NodeId::archive(key),
            label,
            NodeKind::Archive {
                reference_code: None,
            },
        )
    }

    pub fn agent(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(NodeId::agent(key), label, NodeKind::Agent { role: None })
    }

    pub fn step(key: impl Into<String>, label: impl Into<String>, status: Status) -> Self {
        Self::new(NodeId::step(key), label, NodeKind::Step { status })
    }

    pub fn task(key: impl Into<String>, label: impl Into<String>, status: Status) -> Self {
        Self::new(
            NodeId::task(key),
            label,
            NodeKind::Task {
                status,
                responsible: None,
            },
        )
    }

    /// Sentinel child of `owner`.
    pub fn see_more(owner: &NodeId) -> Self {
        Self {
            id: NodeId::see_more(owner),
            label: "See more".to_string(),
            parent: Some(owner.clone()),
            kind: NodeKind::SeeMorePlaceholder,
        }
    }

    /// Loading placeholder child of `owner`.
    pub fn loading(owner: &NodeId) -> Self {
        Self {
            id: NodeId::loading(owner),
            label: "Loading...".to_string(),
            parent: Some(owner.clone()),
            kind: NodeKind::LoadingPlaceholder,
        }
    }

    fn new(id: NodeId, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            label: label.into(),
            parent: None,
            kind,
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Replaces the status of a step or task; no-op for other kinds.
    pub fn with_status(mut self, new_status: Status) -> Self {
        match &mut self.kind {
            NodeKind::Step { status } | NodeKind::Task { status, .. } => *status = new_status,
            _ => {}
        }
        self
    }

    /// Returns `true` if the kind payload agrees with the id variant.
    pub fn is_consistent(&self) -> bool {
        self.kind.matches(&self.id)
    }
}

/// Per-node pagination bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Non-placeholder children currently in the tree.
    pub materialized: usize,
    /// Children reported by the backend.
    pub total: usize,
    /// Child spliced in out of page order by the ancestor path builder.
    pub retained: Option<NodeId>,
}

impl Cursor {
    pub fn new(total: usize) -> Self {
        Self {
            materialized: 0,
            total,
            retained: None,
        }
    }

    /// Returns `true` while a "see more" sentinel is owed.
    pub fn has_more(&self) -> bool {
        self.materialized < self.total
    }

    /// Children that arrived through regular pages.
    pub fn paged(&self) -> usize {
        self.materialized
            .saturating_sub(usize::from(self.retained.is_some()))
    }

    /// Number of pages covered by the paged children (at least one).
    pub fn loaded_pages(&self, page_size: usize) -> usize {
        self.paged().div_ceil(page_size.max(1)).max(1)
    }

    /// 1-based page to request on the next "see more" activation.
    pub fn next_page(&self, page_size: usize) -> usize {
        self.paged() / page_size.max(1) + 1
    }
}

/// UI-owned state of a node.
///
/// Only the UI layer (the `Tree` methods) mutates these; reconciliation
/// carries them through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiFlags {
    pub expanded: bool,
    pub selected: bool,
    pub checked: bool,
}

/// A materialized node owned by the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) data: NodeData,
    pub(crate) children: Vec<NodeId>,
    pub(crate) cursor: Option<Cursor>,
    pub(crate) flags: UiFlags,
}

impl Node {
    /// Materializes a snapshot with default flags and no children.
    pub fn new(data: NodeData) -> Self {
        Self {
            data,
            children: Vec::new(),
            cursor: None,
            flags: UiFlags::default(),
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(NodeData {
            id: NodeId::Root,
            label: String::new(),
            parent: None,
            kind: NodeKind::Root,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.data.id
    }

    pub fn label(&self) -> &str {
        &self.data.label
    }

    pub fn kind(&self) -> &NodeKind {
        &self.data.kind
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.data.parent.as_ref()
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn flags(&self) -> UiFlags {
        self.flags
    }

    pub fn status(&self) -> Option<&Status> {
        self.data.kind.status()
    }

    /// Returns `true` if the node can never have children.
    pub fn is_leaf(&self) -> bool {
        self.data.id.is_leaf()
    }

    pub fn is_placeholder(&self) -> bool {
        self.data.id.is_placeholder()
    }

    /// Returns `true` once the first page of children has been applied.
    pub fn is_materialized(&self) -> bool {
        self.cursor.is_some()
    }

    /// Overwrites each scalar property that differs from `incoming`.
    ///
    /// Returns `true` if anything changed. Children, cursor and flags are
    /// not part of a snapshot and are left alone.
    pub(crate) fn patch(&mut self, incoming: NodeData) -> bool {
        let mut changed = false;
        if self.data.label != incoming.label {
            self.data.label = incoming.label;
            changed = true;
        }
        if self.data.parent != incoming.parent {
            self.data.parent = incoming.parent;
            changed = true;
        }
        if self.data.kind != incoming.kind {
            self.data.kind = incoming.kind;
            changed = true;
        }
        changed
    }
}
