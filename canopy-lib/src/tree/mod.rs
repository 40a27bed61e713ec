//! The tree handle.
//!
//! [`Tree`] owns the single in-memory tree and is the only way to mutate
//! it. Clones share state. Every mutation runs synchronously under a
//! short write lock; fetches happen between lock scopes and are applied
//! only if their ticket is still current.

mod ancestry;
mod index;
mod state;

pub use index::IdentityIndex;
pub use state::Ticket;
pub use state::TreeState;

pub(crate) use state::RootSource;
pub(crate) use state::TailStash;

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;
use log::debug;

use crate::adapter::TreeAdapter;
use crate::config::TreeConfig;
use crate::error::Error;
use crate::fetch::Page;
use crate::fetch::SnapshotFetcher;
use crate::model::Cursor;
use crate::model::Node;
use crate::model::NodeData;
use crate::model::NodeId;
use crate::navigate;
use crate::paging;
use crate::poll::PollTarget;
use crate::reconcile;
use crate::reconcile::Reconciled;

/// Shared handle to a reconciled, paginated tree.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use canopy_lib::adapter::NullAdapter;
/// use canopy_lib::fetch::MemoryFetcher;
/// use canopy_lib::tree::Tree;
///
/// # async fn example() -> Result<(), canopy_lib::Error> {
/// let backend = Arc::new(MemoryFetcher::from_json(r#"[{"id": "archive:a", "label": "A"}]"#)?);
/// let tree = Tree::new(backend, Arc::new(NullAdapter));
/// tree.load_roots().await?;
/// for (id, depth) in tree.visible() {
///     println!("{}{}", "  ".repeat(depth), id);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Tree {
    inner: Arc<RwLock<TreeState>>,
    fetcher: Arc<dyn SnapshotFetcher>,
    config: TreeConfig,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Tree {
    /// Creates an empty tree with the default configuration.
    pub fn new(fetcher: Arc<dyn SnapshotFetcher>, adapter: Arc<dyn TreeAdapter>) -> Self {
        Self::with_config(fetcher, adapter, TreeConfig::default())
    }

    /// Creates an empty tree with a custom configuration.
    pub fn with_config(
        fetcher: Arc<dyn SnapshotFetcher>,
        adapter: Arc<dyn TreeAdapter>,
        config: TreeConfig,
    ) -> Self {
        let state = TreeState::new(adapter, config.page_size);
        Self {
            inner: Arc::new(RwLock::new(state)),
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub(crate) fn fetcher(&self) -> &dyn SnapshotFetcher {
        self.fetcher.as_ref()
    }

    /// Runs `f` with shared access to the state.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&TreeState) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Runs `f` with exclusive access to the state.
    ///
    /// Never hold the guard across an await; all callers pass synchronous
    /// closures.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut TreeState) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns a copy of the node.
    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.read(|s| s.index().get(id).cloned())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.read(|s| s.index().contains(id) && !s.index().is_detached(id))
    }

    /// Ordered children of `id`, placeholders included.
    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.read(|s| s.index().children(id).to_vec())
    }

    /// Top-level nodes.
    pub fn roots(&self) -> Vec<NodeId> {
        self.children(&NodeId::Root)
    }

    pub fn cursor(&self, id: &NodeId) -> Option<Cursor> {
        self.read(|s| s.index().get(id).and_then(|n| n.cursor().cloned()))
    }

    /// Number of nodes in the tree, placeholders included.
    pub fn len(&self) -> usize {
        self.read(|s| s.index().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visible nodes in display order with their depth (top level is 0).
    pub fn visible(&self) -> Vec<(NodeId, usize)> {
        self.read(|s| navigate::visible(s.index()).collect())
    }

    /// The selected node, if any.
    pub fn selected(&self) -> Option<NodeId> {
        self.read(|s| {
            s.index()
                .subtree(&NodeId::Root)
                .into_iter()
                .find(|id| s.index().get(id).is_some_and(|n| n.flags().selected))
        })
    }

    // =========================================================================
    // UI flags
    // =========================================================================

    /// Expands a node, fetching its first page on first expansion.
    ///
    /// A loading placeholder is shown while the page is in flight. If the
    /// fetch fails, the node stays expanded with no children.
    pub async fn expand(&self, id: &NodeId) -> Result<(), Error> {
        let needs_fetch = self.write(|s| {
            let node = s
                .index()
                .get(id)
                .ok_or_else(|| Error::NodeNotFound(id.clone()))?;
            if node.is_leaf() || *id == NodeId::Root {
                return Err(Error::NotExpandable(id.clone()));
            }
            let needs_fetch = !node.is_materialized();
            s.set_expanded(id, true);
            Ok(needs_fetch)
        })?;
        if needs_fetch {
            paging::materialize(self, id).await?;
        }
        Ok(())
    }

    /// Collapses a node. Its children stay materialized.
    pub fn collapse(&self, id: &NodeId) -> bool {
        self.write(|s| s.set_expanded(id, false))
    }

    /// Expands a collapsed node or collapses an expanded one.
    ///
    /// Returns the new expansion state.
    pub async fn toggle(&self, id: &NodeId) -> Result<bool, Error> {
        let expanded = self.read(|s| s.index().get(id).map(|n| n.flags().expanded));
        match expanded {
            Some(true) => {
                self.collapse(id);
                Ok(false)
            }
            Some(false) => {
                self.expand(id).await?;
                Ok(true)
            }
            None => Err(Error::NodeNotFound(id.clone())),
        }
    }

    /// Selects a single node, deselecting every other one.
    pub fn select(&self, id: &NodeId) -> Result<(), Error> {
        self.write(|s| s.select(id))
    }

    pub fn deselect_all(&self) {
        self.write(|s| s.deselect_all())
    }

    /// Sets the checkbox state. Returns `true` if it changed.
    pub fn set_checked(&self, id: &NodeId, checked: bool) -> bool {
        self.write(|s| s.set_checked(id, checked))
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Materializes the top level if it has not been loaded yet.
    pub async fn load_roots(&self) -> Result<(), Error> {
        let loaded = self.read(|s| {
            s.index()
                .get(&NodeId::Root)
                .is_some_and(|n| n.is_materialized())
        });
        if loaded {
            return Ok(());
        }
        paging::materialize(self, &NodeId::Root).await
    }

    /// Loads the next page of `owner`'s children.
    ///
    /// Returns the number of nodes appended.
    pub async fn load_more(&self, owner: &NodeId) -> Result<usize, Error> {
        paging::load_more(self, owner).await
    }

    /// Activates a "see more" sentinel.
    pub async fn activate(&self, sentinel: &NodeId) -> Result<usize, Error> {
        paging::activate(self, sentinel).await
    }

    /// Builds the ancestor path of `start` and selects it.
    ///
    /// The top level switches to the siblings of the path's top node.
    /// Returns the ids from the top level down to `start`.
    pub async fn reveal(&self, start: NodeData) -> Result<Vec<NodeId>, Error> {
        let path = ancestry::reveal(self, start).await?;
        if let Some(last) = path.last() {
            self.select(last)?;
        }
        Ok(path)
    }

    /// Re-fetches every materialized level and reconciles it in place.
    pub async fn refresh(&self) -> Result<(), Error> {
        self.refresh_node(&NodeId::Root).await
    }

    /// Re-fetches the materialized subtree below `id`.
    pub async fn refresh_node(&self, id: &NodeId) -> Result<(), Error> {
        if !self.contains(id) {
            return Err(Error::NodeNotFound(id.clone()));
        }
        reconcile::refresh_subtree(self.clone(), id.clone()).await
    }

    /// Reconciles a snapshot of `parent`'s children into the tree.
    ///
    /// The page is treated as the complete materialized child list;
    /// in-flight fetches for `parent` are superseded.
    pub fn reconcile(&self, parent: &NodeId, page: Page) -> Result<Reconciled, Error> {
        self.write(|s| {
            let node = s
                .index()
                .get(parent)
                .ok_or_else(|| Error::NodeNotFound(parent.clone()))?;
            if node.is_leaf() {
                return Err(Error::NotExpandable(parent.clone()));
            }
            s.issue(parent);
            let total = page.total_count();
            reconcile::reconcile_children(s, parent, page.into_items(), total, None)
        })
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Visible node after `current`, or the first visible node.
    pub fn next_visible(&self, current: Option<&NodeId>) -> Option<NodeId> {
        self.read(|s| navigate::next_visible(s.index(), current))
    }

    /// Visible node before `current`, or the last visible node.
    pub fn previous_visible(&self, current: Option<&NodeId>) -> Option<NodeId> {
        self.read(|s| navigate::previous_visible(s.index(), current))
    }

    pub fn parent_visible(&self, id: &NodeId) -> Option<NodeId> {
        self.read(|s| navigate::parent_visible(s.index(), id))
    }

    pub fn first_child(&self, id: &NodeId) -> Option<NodeId> {
        self.read(|s| navigate::first_child(s.index(), id))
    }
}

#[async_trait]
impl PollTarget for Tree {
    /// Any visible step or task at leaf level that has not finished.
    fn has_pending_work(&self) -> bool {
        self.read(|s| {
            navigate::visible(s.index()).any(|(id, _)| {
                s.index().get(&id).is_some_and(|node| {
                    let leaf_level = node.is_leaf() || !node.flags().expanded;
                    leaf_level && node.status().is_some_and(|status| !status.is_terminal())
                })
            })
        })
    }

    async fn refresh(&self) -> Result<(), Error> {
        debug!("poll refresh");
        Tree::refresh(self).await
    }
}
