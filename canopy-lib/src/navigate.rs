//! Linear keyboard navigation over the visible part of the tree.
//!
//! A node's children are visible only if it is expanded. Nothing is
//! cached: every step walks the visible sequence once.

use crate::model::NodeId;
use crate::tree::IdentityIndex;

/// Depth-first iterator over visible nodes, yielding `(id, depth)`.
#[derive(Debug)]
pub struct VisibleIter<'a> {
    index: &'a IdentityIndex,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for VisibleIter<'_> {
    type Item = (NodeId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        if let Some(node) = self.index.get(&id)
            && node.flags().expanded
        {
            self.stack
                .extend(node.children().iter().rev().map(|c| (c.clone(), depth + 1)));
        }
        Some((id, depth))
    }
}

/// Visible nodes in display order. The top level has depth 0.
pub fn visible(index: &IdentityIndex) -> VisibleIter<'_> {
    let stack = index
        .children(&NodeId::Root)
        .iter()
        .rev()
        .map(|id| (id.clone(), 0))
        .collect();
    VisibleIter { index, stack }
}

/// The visible node after `current`; the first one when `current` is
/// `None`. Returns `None` past the end or if `current` is not visible.
pub fn next_visible(index: &IdentityIndex, current: Option<&NodeId>) -> Option<NodeId> {
    let mut iter = visible(index).map(|(id, _)| id);
    match current {
        None => iter.next(),
        Some(current) => {
            iter.find(|id| id == current)?;
            iter.next()
        }
    }
}

/// The visible node before `current`; the last one when `current` is
/// `None`.
pub fn previous_visible(index: &IdentityIndex, current: Option<&NodeId>) -> Option<NodeId> {
    let mut previous = None;
    for (id, _) in visible(index) {
        if Some(&id) == current {
            return previous;
        }
        previous = Some(id);
    }
    match current {
        None => previous,
        Some(_) => None,
    }
}

/// The parent of `id`, unless `id` is at the top level.
pub fn parent_visible(index: &IdentityIndex, id: &NodeId) -> Option<NodeId> {
    index
        .container_of(id)
        .filter(|parent| *parent != NodeId::Root)
}

/// The first child of `id` if it is expanded.
pub fn first_child(index: &IdentityIndex, id: &NodeId) -> Option<NodeId> {
    let node = index.get(id)?;
    if !node.flags().expanded {
        return None;
    }
    node.children().first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use crate::model::NodeData;

    /// a (expanded) -> [b (collapsed) -> [x], c], d
    fn index() -> IdentityIndex {
        let mut index = IdentityIndex::new();
        for key in ["a", "b", "c", "d", "x"] {
            index.insert(Node::new(NodeData::record(key, key)));
        }
        let link = |index: &mut IdentityIndex, parent: NodeId, children: &[&str]| {
            index.set_children(&parent, children.iter().map(|k| NodeId::record(*k)).collect());
        };
        link(&mut index, NodeId::Root, &["a", "d"]);
        link(&mut index, NodeId::record("a"), &["b", "c"]);
        link(&mut index, NodeId::record("b"), &["x"]);
        index.get_mut(&NodeId::record("a")).unwrap().flags.expanded = true;
        index
    }

    #[test]
    fn test_visible_order() {
        let index = index();
        let order: Vec<(NodeId, usize)> = visible(&index).collect();
        assert_eq!(
            order,
            vec![
                (NodeId::record("a"), 0),
                (NodeId::record("b"), 1),
                (NodeId::record("c"), 1),
                (NodeId::record("d"), 0),
            ]
        );
    }

    #[test]
    fn test_steps() {
        let index = index();
        assert_eq!(next_visible(&index, None), Some(NodeId::record("a")));
        assert_eq!(
            next_visible(&index, Some(&NodeId::record("a"))),
            Some(NodeId::record("b"))
        );
        assert_eq!(
            next_visible(&index, Some(&NodeId::record("c"))),
            Some(NodeId::record("d"))
        );
        assert_eq!(next_visible(&index, Some(&NodeId::record("d"))), None);
        assert_eq!(next_visible(&index, Some(&NodeId::record("x"))), None);

        assert_eq!(previous_visible(&index, None), Some(NodeId::record("d")));
        assert_eq!(
            previous_visible(&index, Some(&NodeId::record("d"))),
            Some(NodeId::record("c"))
        );
        assert_eq!(previous_visible(&index, Some(&NodeId::record("a"))), None);
    }

    #[test]
    fn test_parent_and_child() {
        let index = index();
        assert_eq!(
            parent_visible(&index, &NodeId::record("c")),
            Some(NodeId::record("a"))
        );
        assert_eq!(parent_visible(&index, &NodeId::record("a")), None);
        assert_eq!(
            first_child(&index, &NodeId::record("a")),
            Some(NodeId::record("b"))
        );
        assert_eq!(first_child(&index, &NodeId::record("b")), None);
    }
}
