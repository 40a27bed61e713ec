//! In-memory hierarchy backed by DashMap.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Notify;

use super::Page;
use super::SnapshotFetcher;
use super::number_of_pages;
use crate::error::Error;
use crate::error::FetchError;
use crate::model::NodeData;
use crate::model::NodeId;
use crate::model::NodeKind;
use crate::model::Status;

/// A node in a JSON fixture.
///
/// Ids use the `kind:key` form, e.g. `"record:42"` or `"task:t1"`.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub reference_code: Option<String>,
    #[serde(default)]
    pub structure: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub children: Vec<FixtureNode>,
}

impl FixtureNode {
    fn to_data(&self) -> Result<NodeData, Error> {
        let id = NodeId::parse(&self.id)
            .ok_or_else(|| Error::InvalidSnapshot(format!("bad node id `{}`", self.id)))?;
        let status = self.status.clone().unwrap_or_default();
        let kind = match &id {
            NodeId::Record(_) => NodeKind::Record {
                reference_code: self.reference_code.clone(),
                level: None,
            },
            NodeId::Unit(_) => NodeKind::StructureUnit {
                reference_code: self.reference_code.clone(),
                structure: self.structure.clone().unwrap_or_default(),
            },
            NodeId::Archive(_) => NodeKind::Archive {
                reference_code: self.reference_code.clone(),
            },
            NodeId::Agent(_) => NodeKind::Agent { role: None },
            NodeId::Step(_) => NodeKind::Step { status },
            NodeId::Task(_) => NodeKind::Task {
                status,
                responsible: None,
            },
            NodeId::Root | NodeId::SeeMore(_) | NodeId::Loading(_) => {
                return Err(Error::InvalidSnapshot(format!(
                    "`{}` cannot appear in a fixture",
                    self.id
                )));
            }
        };
        Ok(NodeData {
            id,
            label: self.label.clone(),
            parent: None,
            kind,
        })
    }
}

/// A hierarchy held in memory.
///
/// Serves fixtures, tests and the CLI. The hierarchy can be mutated while
/// a tree is attached to it, fetches can be made to fail, and fetches for
/// a given parent can be held back until released.
///
/// # Example
///
/// ```
/// use canopy_lib::fetch::MemoryFetcher;
/// use canopy_lib::model::{NodeData, NodeId};
///
/// let backend = MemoryFetcher::new();
/// backend.insert(&NodeId::Root, NodeData::archive("a", "Archive A"));
/// backend.insert(&NodeId::archive("a"), NodeData::record("1", "Letters"));
/// assert_eq!(backend.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    nodes: DashMap<NodeId, NodeData>,
    children: DashMap<NodeId, Vec<NodeId>>,
    gates: DashMap<NodeId, (Option<usize>, Arc<Notify>)>,
    failures: AtomicUsize,
    children_calls: AtomicUsize,
    parent_calls: AtomicUsize,
}

impl MemoryFetcher {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a hierarchy from top-level fixture nodes.
    pub fn from_fixture(roots: &[FixtureNode]) -> Result<Self, Error> {
        let fetcher = Self::new();
        fetcher.load(&NodeId::Root, roots)?;
        Ok(fetcher)
    }

    /// Builds a hierarchy from a JSON array of fixture nodes.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let roots: Vec<FixtureNode> =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        Self::from_fixture(&roots)
    }

    fn load(&self, parent: &NodeId, nodes: &[FixtureNode]) -> Result<(), Error> {
        for fixture in nodes {
            let data = fixture.to_data()?;
            let id = data.id.clone();
            if self.nodes.contains_key(&id) {
                return Err(Error::InvalidSnapshot(format!("duplicate node id `{}`", id)));
            }
            self.insert(parent, data);
            self.load(&id, &fixture.children)?;
        }
        Ok(())
    }

    /// Returns the number of nodes in the hierarchy.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the hierarchy is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a stored node.
    pub fn get(&self, id: &NodeId) -> Option<NodeData> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    /// Appends `data` as the last child of `parent`.
    ///
    /// The stored parent reference is rewritten to `parent`.
    pub fn insert(&self, parent: &NodeId, mut data: NodeData) {
        data.parent = match parent {
            NodeId::Root => None,
            other => Some(other.clone()),
        };
        let id = data.id.clone();
        self.nodes.insert(id.clone(), data);
        self.children.entry(parent.clone()).or_default().push(id);
    }

    /// Removes a node and its descendants.
    pub fn remove(&self, id: &NodeId) -> bool {
        let Some((_, data)) = self.nodes.remove(id) else {
            return false;
        };
        let parent = data.parent.unwrap_or(NodeId::Root);
        if let Some(mut siblings) = self.children.get_mut(&parent) {
            siblings.retain(|child| child != id);
        }
        if let Some((_, children)) = self.children.remove(id) {
            for child in children {
                self.remove(&child);
            }
        }
        true
    }

    /// Replaces the stored snapshot of an existing node, keeping its parent.
    pub fn update(&self, data: NodeData) -> bool {
        match self.nodes.get_mut(&data.id) {
            Some(mut entry) => {
                let parent = entry.parent.clone();
                *entry = NodeData { parent, ..data };
                true
            }
            None => false,
        }
    }

    /// Sets the status of a step or task.
    pub fn set_status(&self, id: &NodeId, status: Status) -> bool {
        match self.nodes.get_mut(id) {
            Some(mut entry) => {
                let data = entry.value().clone().with_status(status);
                *entry = data;
                true
            }
            None => false,
        }
    }

    /// Makes the next `n` fetches fail with [`FetchError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Holds back child fetches of `parent` until [`release`](Self::release).
    pub fn hold(&self, parent: &NodeId) {
        self.gates
            .insert(parent.clone(), (None, Arc::new(Notify::new())));
    }

    /// Holds back fetches of one page of `parent`'s children; other pages
    /// are served immediately.
    pub fn hold_page(&self, parent: &NodeId, page: usize) {
        self.gates
            .insert(parent.clone(), (Some(page), Arc::new(Notify::new())));
    }

    /// Lets one held fetch of `parent` proceed and stops holding it.
    pub fn release(&self, parent: &NodeId) {
        if let Some((_, (_, gate))) = self.gates.remove(parent) {
            gate.notify_one();
        }
    }

    /// Number of child-page fetches served so far.
    pub fn children_calls(&self) -> usize {
        self.children_calls.load(Ordering::SeqCst)
    }

    /// Number of parent lookups served so far.
    pub fn parent_calls(&self) -> usize {
        self.parent_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), FetchError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(FetchError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn page_of(&self, ids: &[NodeId], page: usize, page_size: usize) -> Result<Page, FetchError> {
        let total = ids.len();
        if page == 0 || (page > 1 && page > number_of_pages(total, page_size)) {
            return Err(FetchError::PageOutOfRange { page });
        }
        let items = ids
            .iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .filter_map(|id| self.get(id))
            .collect();
        Ok(Page::new(items, total))
    }
}

#[async_trait]
impl SnapshotFetcher for MemoryFetcher {
    async fn fetch_children(
        &self,
        parent: &NodeId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let gate = self.gates.get(parent).and_then(|entry| {
            let (held, gate) = entry.value();
            held.is_none_or(|held| held == page).then(|| Arc::clone(gate))
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        if *parent != NodeId::Root && !self.nodes.contains_key(parent) {
            return Err(FetchError::NotFound(parent.clone()));
        }
        let ids = self
            .children
            .get(parent)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        self.page_of(&ids, page, page_size)
    }

    async fn fetch_parent(&self, node: &NodeId) -> Result<Option<NodeData>, FetchError> {
        self.parent_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let data = self
            .get(node)
            .ok_or_else(|| FetchError::NotFound(node.clone()))?;
        Ok(data.parent.as_ref().and_then(|parent| self.get(parent)))
    }

    async fn fetch_root_siblings(
        &self,
        anchor: &NodeId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let anchor_data = self
            .get(anchor)
            .ok_or_else(|| FetchError::NotFound(anchor.clone()))?;
        let ids: Vec<NodeId> = self
            .children
            .get(&NodeId::Root)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|id| self.get(id).is_some_and(|data| same_level(&anchor_data, &data)))
            .collect();
        self.page_of(&ids, page, page_size)
    }
}

/// Top-level units are only siblings within the same structure.
fn same_level(anchor: &NodeData, other: &NodeData) -> bool {
    match (&anchor.kind, &other.kind) {
        (
            NodeKind::StructureUnit { structure: a, .. },
            NodeKind::StructureUnit { structure: b, .. },
        ) => a == b,
        (NodeKind::StructureUnit { .. }, _) | (_, NodeKind::StructureUnit { .. }) => false,
        _ => true,
    }
}
