//! Tree state: the index, request tickets and adapter-synchronized mutations.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use log::debug;
use log::trace;

use super::index::IdentityIndex;
use crate::adapter::TreeAdapter;
use crate::error::Error;
use crate::model::Cursor;
use crate::model::Node;
use crate::model::NodeData;
use crate::model::NodeId;

/// Where the top-level listing comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RootSource {
    /// `fetch_children(Root)`.
    Listing,
    /// `fetch_root_siblings(anchor)`, set by the ancestor path builder.
    SiblingsOf(NodeId),
}

/// Proof that a fetch was issued for a node.
///
/// Only the newest ticket of a node that still exists may be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    target: NodeId,
    seq: u64,
}

/// Tail elements removed from an owner while a "see more" fetch is in flight.
#[derive(Debug, Clone, Default)]
pub(crate) struct TailStash {
    pub sentinel: bool,
    pub retained: Option<NodeId>,
}

/// The in-memory tree plus everything needed to mutate it consistently.
///
/// All mutation is synchronous; async callers fetch first and then apply
/// under the lock, after checking their ticket.
pub struct TreeState {
    index: IdentityIndex,
    adapter: Arc<dyn TreeAdapter>,
    requests: HashMap<NodeId, u64>,
    next_seq: u64,
    page_size: usize,
    root_source: RootSource,
    stashed_tails: HashMap<NodeId, TailStash>,
}

impl std::fmt::Debug for TreeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeState")
            .field("index", &self.index)
            .field("page_size", &self.page_size)
            .field("root_source", &self.root_source)
            .finish_non_exhaustive()
    }
}

impl TreeState {
    pub(crate) fn new(adapter: Arc<dyn TreeAdapter>, page_size: usize) -> Self {
        Self {
            index: IdentityIndex::new(),
            adapter,
            requests: HashMap::new(),
            next_seq: 0,
            page_size: page_size.max(1),
            root_source: RootSource::Listing,
            stashed_tails: HashMap::new(),
        }
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub(crate) fn index_mut(&mut self) -> &mut IdentityIndex {
        &mut self.index
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn TreeAdapter> {
        &self.adapter
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn root_source(&self) -> &RootSource {
        &self.root_source
    }

    pub(crate) fn set_root_source(&mut self, source: RootSource) {
        self.root_source = source;
    }

    // -------------------------------------------------------------------------
    // Tickets
    // -------------------------------------------------------------------------

    /// Issues a ticket for a fetch targeting `target`, superseding older ones.
    pub(crate) fn issue(&mut self, target: &NodeId) -> Ticket {
        self.next_seq += 1;
        self.requests.insert(target.clone(), self.next_seq);
        Ticket {
            target: target.clone(),
            seq: self.next_seq,
        }
    }

    /// Returns `true` if the ticket's node still exists and no newer fetch
    /// for it was issued.
    pub(crate) fn is_current(&self, ticket: &Ticket) -> bool {
        self.index.contains(&ticket.target)
            && !self.index.is_detached(&ticket.target)
            && self.requests.get(&ticket.target) == Some(&ticket.seq)
    }

    // -------------------------------------------------------------------------
    // Tail stash
    // -------------------------------------------------------------------------

    pub(crate) fn stash(&self, owner: &NodeId) -> Option<&TailStash> {
        self.stashed_tails.get(owner)
    }

    pub(crate) fn set_stash(&mut self, owner: &NodeId, stash: TailStash) {
        self.stashed_tails.insert(owner.clone(), stash);
    }

    pub(crate) fn take_stash(&mut self, owner: &NodeId) -> Option<TailStash> {
        self.stashed_tails.remove(owner)
    }

    // -------------------------------------------------------------------------
    // Node lifecycle
    // -------------------------------------------------------------------------

    /// Brings `data` into the tree as a future child of `parent`.
    ///
    /// Reuses the existing node when `data.id` is one of `siblings` or is
    /// detached, patching only the properties that differ. A node with the
    /// same id attached under another parent has moved; the old instance is
    /// destroyed and a fresh one created. Returns `None` when adopting the
    /// node would make `parent` its own descendant.
    pub(crate) fn adopt(
        &mut self,
        parent: &NodeId,
        data: NodeData,
        siblings: &HashSet<NodeId>,
        changed: &mut HashSet<NodeId>,
    ) -> Option<NodeId> {
        let id = data.id.clone();
        if id == *parent || id == NodeId::Root || id.is_placeholder() {
            debug!("ignoring snapshot {} under {}", id, parent);
            return None;
        }

        if siblings.contains(&id) || self.index.is_detached(&id) {
            if self.index.is_detached(&id) && self.index.subtree(&id).contains(parent) {
                debug!("ignoring snapshot {}: {} is its descendant", id, parent);
                return None;
            }
            self.index.clear_detached(&id);
            if let Some(node) = self.index.get_mut(&id) {
                if node.patch(data) {
                    changed.insert(id.clone());
                }
                return Some(id);
            }
            return None;
        }

        if self.index.contains(&id) {
            if self.index.subtree(&id).contains(parent) {
                debug!("ignoring snapshot {}: {} is its descendant", id, parent);
                return None;
            }
            debug!("{} moved under {}, recreating it", id, parent);
            self.destroy(&id);
        }
        self.index.insert(Node::new(data));
        Some(id)
    }

    /// Unlinks a node from its parent and drops its subtree everywhere.
    pub(crate) fn destroy(&mut self, id: &NodeId) {
        let container = if self.index.is_detached(id) {
            None
        } else {
            self.index.unlink(id)
        };
        if container.is_some()
            && let Err(e) = self.adapter.delete_node(id)
        {
            debug!("adapter rejected delete of {}: {}", id, e);
        }
        self.unindex(id);
        if let Some(container) = container
            && let Err(e) = self.resync_cursor(&container)
        {
            debug!("could not resync {} after removing {}: {}", container, id, e);
        }
    }

    /// Parks an attached node: unlinks it and removes it from the adapter,
    /// keeping its subtree in the index.
    pub(crate) fn detach(&mut self, id: &NodeId) {
        if !self.index.contains(id) || self.index.is_detached(id) {
            return;
        }
        if self.index.unlink(id).is_some() {
            if let Err(e) = self.adapter.delete_node(id) {
                debug!("adapter rejected delete of {}: {}", id, e);
            }
        }
        self.index.mark_detached(id);
    }

    /// Drops a detached node that nobody reattached.
    pub(crate) fn discard_detached(&mut self, id: &NodeId) {
        if self.index.is_detached(id) {
            self.unindex(id);
        }
    }

    fn unindex(&mut self, id: &NodeId) {
        for removed in self.index.remove_subtree(id) {
            trace!("unindexed {}", removed);
            self.requests.remove(&removed);
            self.stashed_tails.remove(&removed);
        }
    }

    /// Returns the sentinel id of `owner`, creating the node if needed.
    pub(crate) fn ensure_sentinel(&mut self, owner: &NodeId) -> NodeId {
        let id = NodeId::see_more(owner);
        if !self.index.contains(&id) {
            self.index.insert(Node::new(NodeData::see_more(owner)));
        }
        self.index.clear_detached(&id);
        id
    }

    /// Shows a loading placeholder under `owner` until its children arrive.
    pub(crate) fn begin_loading(&mut self, owner: &NodeId) -> Result<(), Error> {
        let id = NodeId::loading(owner);
        if self.index.children(owner).contains(&id) {
            return Ok(());
        }
        let mut desired = self.index.children(owner).to_vec();
        self.index.insert(Node::new(NodeData::loading(owner)));
        desired.push(id);
        self.apply_children(owner, desired, &HashSet::new())
    }

    /// Removes the loading placeholder of `owner`, if any.
    pub(crate) fn end_loading(&mut self, owner: &NodeId) {
        let id = NodeId::loading(owner);
        if self.index.contains(&id) {
            self.destroy(&id);
        }
    }

    // -------------------------------------------------------------------------
    // Child lists
    // -------------------------------------------------------------------------

    /// Sets the cursor of `owner`, keeping `materialized` derived.
    pub(crate) fn set_cursor(&mut self, owner: &NodeId, total: usize, retained: Option<NodeId>) {
        if let Some(node) = self.index.get_mut(owner) {
            let materialized = node.children.iter().filter(|c| !c.is_placeholder()).count();
            node.cursor = Some(Cursor {
                materialized,
                total,
                retained,
            });
        }
    }

    /// Restores the sentinel invariant of `owner` from its current children.
    pub(crate) fn resync_cursor(&mut self, owner: &NodeId) -> Result<(), Error> {
        let Some(node) = self.index.get(owner) else {
            return Ok(());
        };
        let Some(cursor) = node.cursor.clone() else {
            return Ok(());
        };
        let mut desired: Vec<NodeId> = node
            .children
            .iter()
            .filter(|c| !c.is_placeholder())
            .cloned()
            .collect();
        let retained = cursor.retained.filter(|r| desired.contains(r));
        if desired.len() < cursor.total {
            desired.push(self.ensure_sentinel(owner));
        }
        let sentinel = NodeId::see_more(owner);
        if !desired.contains(&sentinel) {
            self.discard_sentinel(owner);
        }
        self.apply_children(owner, desired, &HashSet::new())?;
        self.set_cursor(owner, cursor.total, retained);
        Ok(())
    }

    /// Drops the sentinel node of `owner` if it is not listed as a child.
    pub(crate) fn discard_sentinel(&mut self, owner: &NodeId) {
        let id = NodeId::see_more(owner);
        if self.index.contains(&id) && !self.index.children(owner).contains(&id) {
            self.unindex(&id);
        }
    }

    /// Replaces the children of `parent` with `desired`.
    ///
    /// Every id in `desired` must already be indexed. Old children missing
    /// from `desired` are destroyed. The adapter keeps the common prefix of
    /// the old and new lists, deletes the rest of the old list and appends
    /// the rest of the new one (reused nodes are re-rendered with their
    /// subtrees). Nodes in `changed` that stay in the prefix get an
    /// `update_node`. Any adapter error triggers one rebuild of the level.
    pub(crate) fn apply_children(
        &mut self,
        parent: &NodeId,
        desired: Vec<NodeId>,
        changed: &HashSet<NodeId>,
    ) -> Result<(), Error> {
        if !self.index.contains(parent) {
            debug!("dropping child update for missing node {}", parent);
            return Ok(());
        }
        let old = self.index.set_children(parent, desired.clone());
        let keep: HashSet<&NodeId> = desired.iter().collect();
        let prefix = old
            .iter()
            .zip(desired.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut adapter_failed = false;
        for id in &old[prefix..] {
            if let Err(e) = self.adapter.delete_node(id) {
                debug!("adapter rejected delete of {}: {}", id, e);
                adapter_failed = true;
            }
        }
        for id in &old {
            if !keep.contains(id) {
                self.unindex(id);
            }
        }

        if let Some(cursor) = self.index.get_mut(parent).and_then(|n| n.cursor.as_mut()) {
            cursor.materialized = desired.iter().filter(|c| !c.is_placeholder()).count();
        }

        if !adapter_failed {
            for id in &desired[prefix..] {
                if let Err(e) = self.render_subtree(parent, id) {
                    debug!("adapter rejected create of {}: {}", id, e);
                    adapter_failed = true;
                    break;
                }
            }
        }
        if !adapter_failed {
            for id in desired[..prefix].iter().filter(|id| changed.contains(*id)) {
                let Some(node) = self.index.get(id) else {
                    continue;
                };
                if let Err(e) = self.adapter.update_node(node) {
                    debug!("adapter rejected update of {}: {}", id, e);
                    adapter_failed = true;
                    break;
                }
            }
        }

        if adapter_failed {
            self.rebuild_level(parent)?;
        }
        Ok(())
    }

    /// Creates `id` under `parent` in the adapter, then its descendants.
    fn render_subtree(&self, parent: &NodeId, id: &NodeId) -> Result<(), crate::error::AdapterError> {
        let Some(node) = self.index.get(id) else {
            return Ok(());
        };
        trace!("render {} under {}", id, parent);
        self.adapter.create_node(parent, node)?;
        if node.flags.selected {
            self.adapter.select_node(id)?;
        }
        for child in &node.children {
            self.render_subtree(id, child)?;
        }
        Ok(())
    }

    /// Destroys and recreates the adapter's view of `parent`'s children.
    pub(crate) fn rebuild_level(&self, parent: &NodeId) -> Result<(), Error> {
        debug!("rebuilding adapter subtree under {}", parent);
        let children = self.index.children(parent).to_vec();
        for id in self.index.subtree(parent).iter().skip(1) {
            if self.adapter.get_node(id).is_some()
                && let Err(e) = self.adapter.delete_node(id)
            {
                trace!("rebuild: delete of {} rejected: {}", id, e);
            }
        }
        for id in &children {
            self.render_subtree(parent, id)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // UI flags
    // -------------------------------------------------------------------------

    pub(crate) fn set_expanded(&mut self, id: &NodeId, expanded: bool) -> bool {
        match self.index.get_mut(id) {
            Some(node) if !node.is_leaf() && node.flags.expanded != expanded => {
                node.flags.expanded = expanded;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_checked(&mut self, id: &NodeId, checked: bool) -> bool {
        match self.index.get_mut(id) {
            Some(node) => {
                let changed = node.flags.checked != checked;
                node.flags.checked = checked;
                changed
            }
            None => false,
        }
    }

    /// Clears every selection flag and tells the adapter.
    pub(crate) fn deselect_all(&mut self) {
        let selected: Vec<NodeId> = self
            .index
            .subtree(&NodeId::Root)
            .into_iter()
            .filter(|id| self.index.get(id).is_some_and(|n| n.flags.selected))
            .collect();
        for id in selected {
            if let Some(node) = self.index.get_mut(&id) {
                node.flags.selected = false;
            }
        }
        self.adapter.deselect_all();
    }

    /// Single selection: clears the others, then selects `id`.
    pub(crate) fn select(&mut self, id: &NodeId) -> Result<(), Error> {
        if !self.index.contains(id) || *id == NodeId::Root {
            return Err(Error::NodeNotFound(id.clone()));
        }
        self.deselect_all();
        if let Some(node) = self.index.get_mut(id) {
            node.flags.selected = true;
        }
        if let Err(e) = self.adapter.select_node(id) {
            debug!("adapter rejected select of {}: {}", id, e);
            let parent = self.index.container_of(id).unwrap_or(NodeId::Root);
            self.rebuild_level(&parent)?;
            self.adapter.select_node(id)?;
        }
        Ok(())
    }
}
