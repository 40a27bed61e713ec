//! Rendering adapter seam.
//!
//! The engine never draws anything. It pushes incremental mutations to a
//! [`TreeAdapter`] supplied by the rendering toolkit.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::error::AdapterError;
use crate::model::Node;
use crate::model::NodeId;

/// Incremental mutation operations exposed by a tree widget.
///
/// Children are created in order: `create_node` appends to `parent`.
/// Top-level nodes use `NodeId::Root` as their parent.
pub trait TreeAdapter: Send + Sync {
    /// Appends `node` under `parent`.
    fn create_node(&self, parent: &NodeId, node: &Node) -> Result<(), AdapterError>;

    /// Removes a node and everything below it.
    fn delete_node(&self, id: &NodeId) -> Result<(), AdapterError>;

    /// Re-renders a node whose scalar properties changed.
    fn update_node(&self, _node: &Node) -> Result<(), AdapterError> {
        Ok(())
    }

    fn select_node(&self, id: &NodeId) -> Result<(), AdapterError>;

    fn deselect_all(&self);

    /// Returns the adapter's copy of a node.
    fn get_node(&self, id: &NodeId) -> Option<Node>;
}

/// Adapter that accepts everything and renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAdapter;

impl TreeAdapter for NullAdapter {
    fn create_node(&self, _parent: &NodeId, _node: &Node) -> Result<(), AdapterError> {
        Ok(())
    }

    fn delete_node(&self, _id: &NodeId) -> Result<(), AdapterError> {
        Ok(())
    }

    fn select_node(&self, _id: &NodeId) -> Result<(), AdapterError> {
        Ok(())
    }

    fn deselect_all(&self) {}

    fn get_node(&self, _id: &NodeId) -> Option<Node> {
        None
    }
}

/// A mutation received by a [`RecordingAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterOp {
    Create { parent: NodeId, id: NodeId },
    Delete(NodeId),
    Update(NodeId),
    Select(NodeId),
    DeselectAll,
}

#[derive(Debug, Default)]
struct Mirror {
    nodes: HashMap<NodeId, (NodeId, Node)>,
    children: HashMap<NodeId, Vec<NodeId>>,
    selected: HashSet<NodeId>,
    ops: Vec<AdapterOp>,
    fail_next_create: Option<AdapterError>,
}

impl Mirror {
    fn remove(&mut self, id: &NodeId) {
        if let Some((parent, _)) = self.nodes.remove(id)
            && let Some(siblings) = self.children.get_mut(&parent)
        {
            siblings.retain(|child| child != id);
        }
        self.selected.remove(id);
        if let Some(children) = self.children.remove(id) {
            for child in children {
                self.remove(&child);
            }
        }
    }
}

/// Adapter that mirrors the tree it is told about and logs every call.
///
/// It enforces the same rules a real widget would: ids are unique, parents
/// must exist before their children, and deletes must target known nodes.
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    mirror: Mutex<Mirror>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `create_node` call fail with `error`.
    pub fn fail_next_create(&self, error: AdapterError) {
        self.lock().fail_next_create = Some(error);
    }

    /// Operations received so far.
    pub fn ops(&self) -> Vec<AdapterOp> {
        self.lock().ops.clone()
    }

    /// Clears the operation log.
    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Mirrored children of `parent`, in creation order.
    pub fn children_of(&self, parent: &NodeId) -> Vec<NodeId> {
        self.lock().children.get(parent).cloned().unwrap_or_default()
    }

    /// Number of mirrored nodes.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.lock().nodes.contains_key(id)
    }

    pub fn is_selected(&self, id: &NodeId) -> bool {
        self.lock().selected.contains(id)
    }
}

impl TreeAdapter for RecordingAdapter {
    fn create_node(&self, parent: &NodeId, node: &Node) -> Result<(), AdapterError> {
        let mut mirror = self.lock();
        if let Some(error) = mirror.fail_next_create.take() {
            return Err(error);
        }
        let id = node.id().clone();
        if mirror.nodes.contains_key(&id) {
            return Err(AdapterError::IdCollision(id));
        }
        if *parent != NodeId::Root && !mirror.nodes.contains_key(parent) {
            return Err(AdapterError::mismatch(
                id,
                format!("parent {} is not rendered", parent),
            ));
        }
        mirror.nodes.insert(id.clone(), (parent.clone(), node.clone()));
        mirror
            .children
            .entry(parent.clone())
            .or_default()
            .push(id.clone());
        mirror.ops.push(AdapterOp::Create {
            parent: parent.clone(),
            id,
        });
        Ok(())
    }

    fn delete_node(&self, id: &NodeId) -> Result<(), AdapterError> {
        let mut mirror = self.lock();
        if !mirror.nodes.contains_key(id) {
            return Err(AdapterError::mismatch(id.clone(), "node is not rendered"));
        }
        mirror.remove(id);
        mirror.ops.push(AdapterOp::Delete(id.clone()));
        Ok(())
    }

    fn update_node(&self, node: &Node) -> Result<(), AdapterError> {
        let mut mirror = self.lock();
        let id = node.id().clone();
        match mirror.nodes.get_mut(&id) {
            Some((_, stored)) => *stored = node.clone(),
            None => return Err(AdapterError::mismatch(id, "node is not rendered")),
        }
        mirror.ops.push(AdapterOp::Update(id));
        Ok(())
    }

    fn select_node(&self, id: &NodeId) -> Result<(), AdapterError> {
        let mut mirror = self.lock();
        if !mirror.nodes.contains_key(id) {
            return Err(AdapterError::mismatch(id.clone(), "node is not rendered"));
        }
        mirror.selected.insert(id.clone());
        mirror.ops.push(AdapterOp::Select(id.clone()));
        Ok(())
    }

    fn deselect_all(&self) {
        let mut mirror = self.lock();
        mirror.selected.clear();
        mirror.ops.push(AdapterOp::DeselectAll);
    }

    fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.lock().nodes.get(id).map(|(_, node)| node.clone())
    }
}
