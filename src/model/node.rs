//! Arena node storage.
//!
//! All nodes live in a single slotted arena owned by the tree. Parent and
//! child links are `NodeId`s, never references, so deletion cascades are a
//! plain recursive free with no lifetime or cycle hazards.
//!
//! Lazy loading: a child position holds either a materialized `NodeId` or the
//! raw ingest payload it was wrapped from. Materializing a slot swaps the
//! payload for a node at the same position - a value swap, not a structural
//! mutation, so it emits no insert/remove notification.

use crate::model::attrs::Attrs;
use crate::model::variant::NodeVariant;

/// Stable node identifier: index into the arena plus a generation counter so
/// ids of freed nodes do not alias their slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One child position: a live node or a raw payload awaiting materialization.
#[derive(Debug, Clone)]
pub enum ChildSlot {
    Node(NodeId),
    Raw(serde_json::Value),
}

impl ChildSlot {
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ChildSlot::Node(id) => Some(*id),
            ChildSlot::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ChildSlot::Raw(_))
    }
}

/// One element of the annotation tree.
#[derive(Debug)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<ChildSlot>,
    /// Cached position among siblings; invariant: parent.children[row] == self.
    pub(crate) row: usize,
    /// False while any child slot still holds a raw payload.
    pub(crate) loaded: bool,
    pub(crate) attrs: Attrs,
    pub(crate) variant: NodeVariant,
}

impl Node {
    pub fn new(variant: NodeVariant, attrs: Attrs) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            row: 0,
            loaded: true,
            attrs,
            variant,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn variant(&self) -> &NodeVariant {
        &self.variant
    }

    pub(crate) fn refresh_loaded(&mut self) {
        self.loaded = !self.children.iter().any(ChildSlot::is_raw);
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Slotted arena with generation-checked ids.
#[derive(Default)]
pub struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            generation: 0,
            node: None,
        }
    }
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Free a node and all its materialized descendants.
    /// Descendants are considered removed without individual teardown.
    pub fn free_subtree(&mut self, id: NodeId) {
        let children = match self.get(id) {
            Some(node) => node.children.clone(),
            None => return,
        };
        for slot in children {
            if let ChildSlot::Node(child) = slot {
                self.free_subtree(child);
            }
        }
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.is_some() {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.len -= 1;
            }
        }
    }
}
