//! Identity index: id -> node lookup for the whole tree.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::model::Node;
use crate::model::NodeId;

/// Arena of materialized nodes keyed by identity.
///
/// Parents own their children through ordered id lists, so every lookup is
/// a single hash probe. The synthetic `NodeId::Root` is always present.
///
/// A node can be *detached*: indexed (with its whole subtree) but not
/// listed under any parent. The ancestor path builder and the pagination
/// cursor park nodes there while they rebuild a level.
///
/// Child lists are only changed through [`set_children`](Self::set_children)
/// and [`unlink`](Self::unlink), which keep the child -> container map in
/// step.
#[derive(Debug)]
pub struct IdentityIndex {
    nodes: HashMap<NodeId, Node>,
    containers: HashMap<NodeId, NodeId>,
    detached: HashSet<NodeId>,
}

impl Default for IdentityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityIndex {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::Root, Node::root());
        Self {
            nodes,
            containers: HashMap::new(),
            detached: HashSet::new(),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of indexed nodes, excluding the synthetic root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Children of `id`, or an empty slice if it is unknown.
    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn is_detached(&self, id: &NodeId) -> bool {
        self.detached.contains(id)
    }

    /// Adds a node without attaching it to a parent.
    pub(crate) fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id().clone(), node);
    }

    pub(crate) fn mark_detached(&mut self, id: &NodeId) {
        if self.nodes.contains_key(id) {
            self.detached.insert(id.clone());
        }
    }

    /// Clears the detached mark. Returns `true` if it was set.
    pub(crate) fn clear_detached(&mut self, id: &NodeId) -> bool {
        self.detached.remove(id)
    }

    /// Replaces the child list of `parent`. Returns the previous list.
    pub(crate) fn set_children(&mut self, parent: &NodeId, children: Vec<NodeId>) -> Vec<NodeId> {
        let Some(node) = self.nodes.get_mut(parent) else {
            return Vec::new();
        };
        let old = std::mem::replace(&mut node.children, children);
        for child in &old {
            if self.containers.get(child) == Some(parent) {
                self.containers.remove(child);
            }
        }
        for child in &node.children {
            self.containers.insert(child.clone(), parent.clone());
        }
        old
    }

    /// Removes `id` from its container's child list, if it has one.
    pub(crate) fn unlink(&mut self, id: &NodeId) -> Option<NodeId> {
        let container = self.containers.remove(id)?;
        if let Some(parent) = self.nodes.get_mut(&container) {
            parent.children.retain(|child| child != id);
        }
        Some(container)
    }

    /// The parent whose child list contains `id`.
    pub fn container_of(&self, id: &NodeId) -> Option<NodeId> {
        if self.detached.contains(id) {
            return None;
        }
        self.containers.get(id).cloned()
    }

    /// Removes `id` and all of its descendants. Returns the removed ids.
    ///
    /// The caller is responsible for unlinking `id` from its parent.
    pub(crate) fn remove_subtree(&mut self, id: &NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if current == NodeId::Root {
                continue;
            }
            if let Some(node) = self.nodes.remove(&current) {
                self.detached.remove(&current);
                self.containers.remove(&current);
                stack.extend(node.children);
                removed.push(current);
            }
        }
        removed
    }

    /// All ids in the subtree rooted at `id`, parent before children.
    pub fn subtree(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
                out.push(current);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeData;

    fn index_with_chain() -> IdentityIndex {
        let mut index = IdentityIndex::new();
        let a = NodeData::archive("a", "A");
        let b = NodeData::record("b", "B").with_parent(NodeId::archive("a"));
        index.insert(Node::new(a));
        index.insert(Node::new(b));
        index.set_children(&NodeId::Root, vec![NodeId::archive("a")]);
        index.set_children(&NodeId::archive("a"), vec![NodeId::record("b")]);
        index
    }

    #[test]
    fn test_remove_subtree() {
        let mut index = index_with_chain();
        assert_eq!(index.len(), 2);

        let removed = index.remove_subtree(&NodeId::archive("a"));
        assert_eq!(removed.len(), 2);
        assert!(index.is_empty());
        assert!(index.contains(&NodeId::Root));
    }

    #[test]
    fn test_container_of() {
        let index = index_with_chain();
        assert_eq!(
            index.container_of(&NodeId::record("b")),
            Some(NodeId::archive("a"))
        );
        assert_eq!(index.container_of(&NodeId::archive("a")), Some(NodeId::Root));
        assert_eq!(index.container_of(&NodeId::record("zzz")), None);
    }

    #[test]
    fn test_container_follows_child_lists() {
        let mut index = index_with_chain();
        // No parent reference on the snapshot; the map alone resolves it.
        index.insert(Node::new(NodeData::record("c", "C")));
        index.set_children(
            &NodeId::archive("a"),
            vec![NodeId::record("b"), NodeId::record("c")],
        );
        assert_eq!(
            index.container_of(&NodeId::record("c")),
            Some(NodeId::archive("a"))
        );

        index.set_children(&NodeId::archive("a"), vec![NodeId::record("c")]);
        assert_eq!(index.container_of(&NodeId::record("b")), None);

        assert_eq!(index.unlink(&NodeId::record("c")), Some(NodeId::archive("a")));
        assert!(index.children(&NodeId::archive("a")).is_empty());
        assert_eq!(index.container_of(&NodeId::record("c")), None);

        index.set_children(&NodeId::Root, vec![NodeId::archive("a"), NodeId::record("c")]);
        index.mark_detached(&NodeId::record("c"));
        assert_eq!(index.container_of(&NodeId::record("c")), None);
    }

    #[test]
    fn test_subtree_order() {
        let index = index_with_chain();
        assert_eq!(
            index.subtree(&NodeId::Root),
            vec![NodeId::Root, NodeId::archive("a"), NodeId::record("b")]
        );
    }
}
