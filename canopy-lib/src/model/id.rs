//! Node identity.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Stable identity of a node in the tree.
///
/// Every kind has exactly one identity accessor, so a record and a
/// structure unit that share a backend key never collide. Placeholders
/// are keyed by the node that owns them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum NodeId {
    /// Synthetic owner of the top level. Never rendered.
    Root,
    /// A described item, file or directory in the archival content tree.
    Record(String),
    /// A classification-scheme node.
    Unit(String),
    /// An archive (top of a content hierarchy).
    Archive(String),
    /// An archival agent.
    Agent(String),
    /// A workflow step.
    Step(String),
    /// A workflow task.
    Task(String),
    /// "See more" sentinel of the boxed owner.
    SeeMore(Box<NodeId>),
    /// Loading placeholder of the boxed owner.
    Loading(Box<NodeId>),
}

impl NodeId {
    pub fn record(key: impl Into<String>) -> Self {
        Self::Record(key.into())
    }

    pub fn unit(key: impl Into<String>) -> Self {
        Self::Unit(key.into())
    }

    pub fn archive(key: impl Into<String>) -> Self {
        Self::Archive(key.into())
    }

    pub fn agent(key: impl Into<String>) -> Self {
        Self::Agent(key.into())
    }

    pub fn step(key: impl Into<String>) -> Self {
        Self::Step(key.into())
    }

    pub fn task(key: impl Into<String>) -> Self {
        Self::Task(key.into())
    }

    /// Sentinel id for the given owner.
    pub fn see_more(owner: &NodeId) -> Self {
        Self::SeeMore(Box::new(owner.clone()))
    }

    /// Loading placeholder id for the given owner.
    pub fn loading(owner: &NodeId) -> Self {
        Self::Loading(Box::new(owner.clone()))
    }

    /// Backend key, if this id maps to a backend entity.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Record(k)
            | Self::Unit(k)
            | Self::Archive(k)
            | Self::Agent(k)
            | Self::Step(k)
            | Self::Task(k) => Some(k),
            Self::Root | Self::SeeMore(_) | Self::Loading(_) => None,
        }
    }

    /// Owner of a placeholder id.
    pub fn owner(&self) -> Option<&NodeId> {
        match self {
            Self::SeeMore(owner) | Self::Loading(owner) => Some(owner),
            _ => None,
        }
    }

    /// Returns `true` for sentinel and loading ids.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::SeeMore(_) | Self::Loading(_))
    }

    /// Returns `true` if nodes with this id can never have children.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Self::Task(_) | Self::Agent(_) | Self::SeeMore(_) | Self::Loading(_)
        )
    }

    /// Parses the `kind:key` form produced by [`Display`](fmt::Display).
    pub fn parse(s: &str) -> Option<Self> {
        if s == "root" {
            return Some(Self::Root);
        }
        if let Some(rest) = s.strip_prefix("see-more:") {
            return Self::parse(rest).map(|owner| Self::see_more(&owner));
        }
        if let Some(rest) = s.strip_prefix("loading:") {
            return Self::parse(rest).map(|owner| Self::loading(&owner));
        }
        let (kind, key) = s.split_once(':')?;
        if key.is_empty() {
            return None;
        }
        match kind {
            "record" => Some(Self::record(key)),
            "unit" => Some(Self::unit(key)),
            "archive" => Some(Self::archive(key)),
            "agent" => Some(Self::agent(key)),
            "step" => Some(Self::step(key)),
            "task" => Some(Self::task(key)),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Record(k) => write!(f, "record:{}", k),
            Self::Unit(k) => write!(f, "unit:{}", k),
            Self::Archive(k) => write!(f, "archive:{}", k),
            Self::Agent(k) => write!(f, "agent:{}", k),
            Self::Step(k) => write!(f, "step:{}", k),
            Self::Task(k) => write!(f, "task:{}", k),
            Self::SeeMore(owner) => write!(f, "see-more:{}", owner),
            Self::Loading(owner) => write!(f, "loading:{}", owner),
        }
    }
}
