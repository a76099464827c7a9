//! AnnotationTree - the indexed model facade over the node arena.
//!
//! Owns the arena, the dirty flag and the observer hub; translates
//! row/column addresses into arena operations and brackets every structural
//! mutation with the matching about-to-change/changed event pair. The facade
//! holds no duplicate state: `ModelIndex` resolves through the nodes' cached
//! rows and child slots.
//!
//! Lazy materialization happens here: `child_at` realizes exactly one raw
//! slot, `load_all` realizes a node's full child list and is idempotent, so
//! a reentrant lazy access during bulk loading is harmless.

use std::collections::HashSet;

use log::warn;

use crate::error::ModelError;
use crate::events::{Observers, SubscriptionId, TreeEvent};
use crate::model::attrs::Attrs;
use crate::model::keys::{
    CLASS_IMAGE, CLASS_VIDEO, K_ANNOTATIONS, K_CLASS, K_FILENAME, K_FRAMES, K_UNCONFIRMED,
    K_UNLABELED,
};
use crate::model::node::{Arena, ChildSlot, Node, NodeId};
use crate::model::value::Value;
use crate::model::variant::{
    AnnotationVariant, FrameVariant, ImageVariant, KeyRowVariant, NodeBehavior, NodeKind,
    RootVariant, VideoVariant,
};

/// Row decoration hint for the view layer (the `getColor` contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Normal,
    /// Node awaits manual labeling
    Unlabeled,
    /// Node carries unconfirmed machine-produced values
    Unconfirmed,
}

/// Position-addressed handle into the tree: a node plus a column.
/// Only column 0 carries hierarchy; column 1 is the value/detail text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelIndex {
    pub node: NodeId,
    pub column: usize,
}

/// Display value used when `data()` cannot resolve its index.
/// The view degrades to this marker instead of receiving an error.
pub const INVALID_MARKER: &str = "<invalid>";

pub struct AnnotationTree {
    arena: Arena,
    root: NodeId,
    dirty: bool,
    observers: Observers,
    extra_hidden: HashSet<String>,
}

impl Default for AnnotationTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AnnotationTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationTree")
            .field("nodes", &self.arena.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl AnnotationTree {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new(RootVariant.into(), Attrs::new()));
        Self {
            arena,
            root,
            dirty: false,
            observers: Observers::new(),
            extra_hidden: HashSet::new(),
        }
    }

    /// Wrap pre-validated file records as lazy children of a fresh root.
    pub(crate) fn with_raw_files(records: Vec<serde_json::Value>) -> Self {
        let mut tree = Self::new();
        let root = tree.root;
        {
            let node = tree.node_mut_infallible(root);
            node.children = records.into_iter().map(ChildSlot::Raw).collect();
            node.refresh_loaded();
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Additional hidden keys applied to nodes materialized from now on
    /// (on top of the built-in class/unlabeled/unconfirmed set).
    pub fn set_extra_hidden_keys<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_hidden = keys.into_iter().map(Into::into).collect();
    }

    // ========== Node access ==========

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.arena.get(id).ok_or(ModelError::StaleNode)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ModelError> {
        self.arena.get_mut(id).ok_or(ModelError::StaleNode)
    }

    // Internal access for ids the tree just allocated itself.
    fn node_mut_infallible(&mut self, id: NodeId) -> &mut Node {
        self.arena.get_mut(id).expect("arena invariant: live node id")
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind, ModelError> {
        Ok(self.node(id)?.variant.kind())
    }

    pub fn attrs(&self, id: NodeId) -> Result<&Attrs, ModelError> {
        Ok(&self.node(id)?.attrs)
    }

    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>, ModelError> {
        Ok(self.node(id)?.parent)
    }

    pub fn row_of(&self, id: NodeId) -> Result<usize, ModelError> {
        Ok(self.node(id)?.row)
    }

    pub(crate) fn child_slots(&self, id: NodeId) -> Result<&[ChildSlot], ModelError> {
        Ok(&self.node(id)?.children)
    }

    /// Whether the node is reachable from the root (a "live" node).
    /// Detached subtrees mutate silently until inserted.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.arena.get(current).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    // ========== Dirty flag & events ==========

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Explicit acknowledgement after a save; the flag is never cleared
    /// implicitly.
    pub fn clear_dirty(&mut self) {
        if self.dirty {
            self.dirty = false;
            self.observers.emit(TreeEvent::DirtyChanged(false));
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&TreeEvent) + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Drain deferred events queued since the last poll.
    pub fn poll_events(&mut self) -> Vec<TreeEvent> {
        self.observers.poll()
    }

    /// Single shared emit handler: trailing mutation events flip the dirty
    /// flag here instead of every call site setting it by hand.
    fn emit(&mut self, event: TreeEvent) {
        let mutation = event.is_mutation();
        self.observers.emit(event);
        if mutation && !self.dirty {
            self.dirty = true;
            self.observers.emit(TreeEvent::DirtyChanged(true));
        }
    }

    // ========== Structure: counts, navigation, lazy loading ==========

    /// Number of children. Valid without materialization: raw payload slots
    /// count without being realized.
    pub fn row_count(&self, id: NodeId) -> Result<usize, ModelError> {
        Ok(self.node(id)?.children.len())
    }

    pub fn is_loaded(&self, id: NodeId) -> Result<bool, ModelError> {
        Ok(self.node(id)?.loaded)
    }

    /// Child at position `i`, materializing exactly that slot when raw.
    pub fn child_at(&mut self, parent: NodeId, i: usize) -> Result<NodeId, ModelError> {
        let len = self.row_count(parent)?;
        if i >= len {
            return Err(ModelError::OutOfRange { index: i, len });
        }
        self.materialize_slot(parent, i)
    }

    /// Materialize every remaining raw child slot. Idempotent: safe to call
    /// redundantly, including reentrantly from lazy accesses.
    pub fn load_all(&mut self, id: NodeId) -> Result<(), ModelError> {
        let len = self.row_count(id)?;
        for i in 0..len {
            self.materialize_slot(id, i)?;
        }
        let node = self.node_mut(id)?;
        node.loaded = true;
        Ok(())
    }

    /// Sibling `step` positions forward; None past the last sibling.
    pub fn next_sibling(&mut self, id: NodeId, step: usize) -> Result<Option<NodeId>, ModelError> {
        let (parent, row) = {
            let node = self.node(id)?;
            match node.parent {
                Some(p) => (p, node.row),
                None => return Ok(None),
            }
        };
        let target = row + step;
        if target >= self.row_count(parent)? {
            return Ok(None);
        }
        Ok(Some(self.child_at(parent, target)?))
    }

    /// Sibling `step` positions back. Steps past the front clamp to the
    /// first sibling; a node that already is first yields None (backward
    /// walks terminate instead of wrapping).
    pub fn prev_sibling(&mut self, id: NodeId, step: usize) -> Result<Option<NodeId>, ModelError> {
        let (parent, row) = {
            let node = self.node(id)?;
            match node.parent {
                Some(p) => (p, node.row),
                None => return Ok(None),
            }
        };
        if row == 0 {
            return Ok(None);
        }
        let target = row.saturating_sub(step);
        Ok(Some(self.child_at(parent, target)?))
    }

    /// Nearest preceding frame-like sibling. A node's child list mixes
    /// KeyRow rows with frame rows, so frame navigation must skip the
    /// non-frame ones; None when no earlier frame exists.
    pub fn prev_frame_sibling(&mut self, id: NodeId) -> Result<Option<NodeId>, ModelError> {
        let mut cursor = id;
        while let Some(prev) = self.prev_sibling(cursor, 1)? {
            if self.node(prev)?.variant.is_frame_like() {
                return Ok(Some(prev));
            }
            cursor = prev;
        }
        Ok(None)
    }

    // ========== Structure: mutation ==========

    /// Insert a detached node at `pos`, renumbering subsequent siblings.
    /// Bracketed with insert notifications when `parent` is attached.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        pos: usize,
        child: NodeId,
    ) -> Result<(), ModelError> {
        let len = self.row_count(parent)?;
        if pos > len {
            return Err(ModelError::OutOfRange { index: pos, len });
        }
        if self.node(child)?.parent.is_some() {
            return Err(ModelError::AlreadyAttached);
        }

        let attached = self.is_attached(parent);
        if attached {
            self.observers.emit(TreeEvent::RowsAboutToBeInserted {
                parent,
                first: pos,
                last: pos,
            });
        }

        self.node_mut_infallible(parent)
            .children
            .insert(pos, ChildSlot::Node(child));
        {
            let c = self.node_mut_infallible(child);
            c.parent = Some(parent);
            c.row = pos;
        }
        self.renumber_from(parent, pos + 1);

        if attached {
            self.emit(TreeEvent::RowsInserted {
                parent,
                first: pos,
                last: pos,
            });
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        let len = self.row_count(parent)?;
        self.insert_child(parent, len, child)
    }

    /// Bulk append with a single notification pair covering the whole range.
    pub fn append_children(
        &mut self,
        parent: NodeId,
        children: Vec<NodeId>,
    ) -> Result<(), ModelError> {
        if children.is_empty() {
            return Ok(());
        }
        let first = self.row_count(parent)?;
        for &child in &children {
            if self.node(child)?.parent.is_some() {
                return Err(ModelError::AlreadyAttached);
            }
        }
        let last = first + children.len() - 1;

        let attached = self.is_attached(parent);
        if attached {
            self.observers
                .emit(TreeEvent::RowsAboutToBeInserted { parent, first, last });
        }

        for (offset, child) in children.into_iter().enumerate() {
            self.node_mut_infallible(parent)
                .children
                .push(ChildSlot::Node(child));
            let c = self.node_mut_infallible(child);
            c.parent = Some(parent);
            c.row = first + offset;
        }

        if attached {
            self.emit(TreeEvent::RowsInserted { parent, first, last });
        }
        Ok(())
    }

    /// Remove the child at `index`, cascading to its descendants.
    pub fn delete_child(&mut self, parent: NodeId, index: usize) -> Result<(), ModelError> {
        let len = self.row_count(parent)?;
        if index >= len {
            return Err(ModelError::OutOfRange { index, len });
        }

        let attached = self.is_attached(parent);
        if attached {
            self.observers.emit(TreeEvent::RowsAboutToBeRemoved {
                parent,
                first: index,
                last: index,
            });
        }

        let slot = self.node_mut_infallible(parent).children.remove(index);
        if let ChildSlot::Node(id) = slot {
            self.arena.free_subtree(id);
        }
        self.renumber_from(parent, index);
        self.node_mut_infallible(parent).refresh_loaded();

        if attached {
            self.emit(TreeEvent::RowsRemoved {
                parent,
                first: index,
                last: index,
            });
        }
        Ok(())
    }

    /// Remove a specific child node; invalid-argument error when `child` is
    /// not a child of `parent`.
    pub fn delete_child_node(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        let row = {
            let node = self.node(child)?;
            if node.parent != Some(parent) {
                return Err(ModelError::NotAChild);
            }
            node.row
        };
        self.delete_child(parent, row)
    }

    /// Remove every child with a single notification pair for the range.
    pub fn delete_all_children(&mut self, parent: NodeId) -> Result<(), ModelError> {
        let len = self.row_count(parent)?;
        if len == 0 {
            return Ok(());
        }

        let attached = self.is_attached(parent);
        if attached {
            self.observers.emit(TreeEvent::RowsAboutToBeRemoved {
                parent,
                first: 0,
                last: len - 1,
            });
        }

        let slots = std::mem::take(&mut self.node_mut_infallible(parent).children);
        for slot in slots {
            if let ChildSlot::Node(id) = slot {
                self.arena.free_subtree(id);
            }
        }
        self.node_mut_infallible(parent).loaded = true;

        if attached {
            self.emit(TreeEvent::RowsRemoved {
                parent,
                first: 0,
                last: len - 1,
            });
        }
        Ok(())
    }

    fn renumber_from(&mut self, parent: NodeId, from: usize) {
        let ids: Vec<(usize, NodeId)> = self
            .node_mut_infallible(parent)
            .children
            .iter()
            .enumerate()
            .skip(from)
            .filter_map(|(i, slot)| slot.node_id().map(|id| (i, id)))
            .collect();
        for (i, id) in ids {
            self.node_mut_infallible(id).row = i;
        }
    }

    // ========== Annotations ==========

    /// Build a detached Annotation node (with its KeyRow children) from a
    /// flat attribute list. Attach with `insert_child`/`append_child`.
    pub fn new_annotation(&mut self, pairs: Vec<(String, Value)>) -> NodeId {
        let mut attrs = Attrs::with_hidden(self.extra_hidden.iter().cloned());
        for (k, v) in pairs {
            attrs.set(k, v);
        }
        let key_rows = self.make_key_rows(&attrs);
        let id = self
            .arena
            .alloc(Node::new(AnnotationVariant.into(), attrs));
        self.adopt_slots(id, key_rows);
        id
    }

    /// Append a new annotation to an image or frame node (append + notify).
    pub fn add_annotation(
        &mut self,
        parent: NodeId,
        pairs: Vec<(String, Value)>,
    ) -> Result<NodeId, ModelError> {
        let kind = self.kind(parent)?;
        if !matches!(kind, NodeKind::Image | NodeKind::Frame) {
            return Err(ModelError::WrongKind {
                expected: "Image or Frame",
                got: self.node(parent)?.variant.node_type(),
            });
        }
        let id = self.new_annotation(pairs);
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// All Annotation children of a node, materializing lazily as needed.
    pub fn annotation_children(&mut self, parent: NodeId) -> Result<Vec<NodeId>, ModelError> {
        let len = self.row_count(parent)?;
        let mut out = Vec::new();
        for i in 0..len {
            let child = self.child_at(parent, i)?;
            if self.kind(child)? == NodeKind::Annotation {
                out.push(child);
            }
        }
        Ok(out)
    }

    /// Remove all Annotation children, keeping KeyRows and other structure.
    pub fn clear_annotations(&mut self, parent: NodeId) -> Result<(), ModelError> {
        for id in self.annotation_children(parent)? {
            self.delete_child_node(parent, id)?;
        }
        Ok(())
    }

    // ========== Key/value store ==========

    /// Read an attribute. Callers needing a default should go through
    /// `attrs()` explicitly.
    pub fn value(&self, node: NodeId, key: &str) -> Result<Value, ModelError> {
        self.node(node)?
            .attrs
            .get(key)
            .cloned()
            .ok_or_else(|| ModelError::KeyNotFound(key.to_string()))
    }

    /// Write an attribute. New visible keys grow a sorted KeyRow child;
    /// setting an existing key to its current value is a no-op with zero
    /// notifications. The change notification is scoped to the KeyRow if one
    /// exists, else to the owning node's own row.
    pub fn set_value(
        &mut self,
        node: NodeId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        if let Some(target) = self.set_value_inner(node, key, value.into())? {
            self.emit(TreeEvent::DataChanged {
                node: target,
                first_column: 0,
                last_column: 1,
            });
        }
        Ok(())
    }

    /// Write without the trailing data notification (structural KeyRow
    /// insertion for brand-new keys still fires its insert pair).
    pub fn set_value_silent(
        &mut self,
        node: NodeId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        self.set_value_inner(node, key, value.into())?;
        Ok(())
    }

    /// Returns the notification target when the store changed, None on no-op.
    fn set_value_inner(
        &mut self,
        node: NodeId,
        key: &str,
        value: Value,
    ) -> Result<Option<NodeId>, ModelError> {
        let (is_new, hidden) = {
            let n = self.node(node)?;
            if n.attrs.get(key) == Some(&value) {
                return Ok(None);
            }
            (!n.attrs.contains(key), n.attrs.is_hidden(key))
        };

        self.node_mut(node)?.attrs.set(key.to_string(), value);

        if hidden {
            return Ok(Some(node));
        }
        if is_new {
            let pos = self.key_row_insert_pos(node, key)?;
            let kr = self
                .arena
                .alloc(Node::new(KeyRowVariant::new(key).into(), Attrs::new()));
            self.insert_child(node, pos, kr)?;
            return Ok(Some(kr));
        }
        Ok(Some(self.find_key_row(node, key)?.unwrap_or(node)))
    }

    /// Batched write: one trailing data notification for the whole mapping
    /// instead of one per key (required for efficient interpolation writes).
    pub fn update(
        &mut self,
        node: NodeId,
        pairs: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), ModelError> {
        let mut changed = false;
        for (key, value) in pairs {
            changed |= self.set_value_inner(node, &key, value)?.is_some();
        }
        if changed {
            self.emit(TreeEvent::DataChanged {
                node,
                first_column: 0,
                last_column: 1,
            });
        }
        Ok(())
    }

    /// Remove a stored key and its KeyRow child if present.
    pub fn delete_key(&mut self, node: NodeId, key: &str) -> Result<Value, ModelError> {
        if !self.node(node)?.attrs.contains(key) {
            return Err(ModelError::KeyNotFound(key.to_string()));
        }
        if let Some(kr) = self.find_key_row(node, key)? {
            self.delete_child_node(node, kr)?;
        }
        let removed = self
            .node_mut(node)?
            .attrs
            .remove(key)
            .ok_or_else(|| ModelError::KeyNotFound(key.to_string()))?;
        self.emit(TreeEvent::DataChanged {
            node,
            first_column: 0,
            last_column: 1,
        });
        Ok(removed)
    }

    /// First position whose existing KeyRow key sorts after `key`, else the
    /// end of the child list - keeps KeyRows mutually sorted.
    fn key_row_insert_pos(&self, node: NodeId, key: &str) -> Result<usize, ModelError> {
        let n = self.node(node)?;
        for (i, slot) in n.children.iter().enumerate() {
            if let ChildSlot::Node(id) = slot {
                if let Some(kr) = self.node(*id)?.variant.as_key_row() {
                    if kr.key.as_str() > key {
                        return Ok(i);
                    }
                }
            }
        }
        Ok(n.children.len())
    }

    fn find_key_row(&self, node: NodeId, key: &str) -> Result<Option<NodeId>, ModelError> {
        for slot in &self.node(node)?.children {
            if let ChildSlot::Node(id) = slot {
                if let Some(kr) = self.node(*id)?.variant.as_key_row() {
                    if kr.key == key {
                        return Ok(Some(*id));
                    }
                }
            }
        }
        Ok(None)
    }

    // ========== Workflow flags ==========

    pub fn is_unlabeled(&self, node: NodeId) -> bool {
        self.node(node)
            .map(|n| n.attrs.get_bool_or(K_UNLABELED, false))
            .unwrap_or(false)
    }

    pub fn set_unlabeled(&mut self, node: NodeId, v: bool) -> Result<(), ModelError> {
        self.set_value(node, K_UNLABELED, Value::Bool(v))
    }

    pub fn is_unconfirmed(&self, node: NodeId) -> bool {
        self.node(node)
            .map(|n| n.attrs.get_bool_or(K_UNCONFIRMED, false))
            .unwrap_or(false)
    }

    pub fn set_unconfirmed(&mut self, node: NodeId, v: bool) -> Result<(), ModelError> {
        self.set_value(node, K_UNCONFIRMED, Value::Bool(v))
    }

    /// Row decoration for the view: unlabeled outranks unconfirmed.
    pub fn highlight(&self, node: NodeId) -> Highlight {
        if self.is_unlabeled(node) {
            Highlight::Unlabeled
        } else if self.is_unconfirmed(node) {
            Highlight::Unconfirmed
        } else {
            Highlight::Normal
        }
    }

    // ========== Indexed facade ==========

    /// Construct an index from (row, column, parent). A column ≥ 1 parent has
    /// no children by contract, so indexing under one is out of range.
    pub fn index(
        &mut self,
        row: usize,
        column: usize,
        parent: Option<ModelIndex>,
    ) -> Result<ModelIndex, ModelError> {
        if let Some(p) = parent {
            if p.column != 0 {
                return Err(ModelError::OutOfRange { index: row, len: 0 });
            }
        }
        let parent_id = parent.map(|p| p.node).unwrap_or(self.root);
        let node = self.child_at(parent_id, row)?;
        Ok(ModelIndex { node, column })
    }

    /// Parent index (column 0); None for top-level rows.
    pub fn parent_index(&self, index: ModelIndex) -> Option<ModelIndex> {
        let parent = self.arena.get(index.node)?.parent?;
        if parent == self.root {
            return None;
        }
        Some(ModelIndex { node: parent, column: 0 })
    }

    /// Child count at an index; None addresses the invisible root.
    /// Columns ≥ 1 report zero unconditionally.
    pub fn row_count_at(&self, index: Option<ModelIndex>) -> usize {
        match index {
            None => self.row_count(self.root).unwrap_or(0),
            Some(idx) if idx.column != 0 => 0,
            Some(idx) => self.row_count(idx.node).unwrap_or(0),
        }
    }

    pub fn has_children(&self, index: Option<ModelIndex>) -> bool {
        self.row_count_at(index) > 0
    }

    /// Display text for a cell. Degrades to `INVALID_MARKER` instead of
    /// erroring through the view.
    pub fn data(&self, index: ModelIndex) -> String {
        let node = match self.arena.get(index.node) {
            Some(n) => n,
            None => return INVALID_MARKER.to_string(),
        };
        // KeyRows render from their owner's attrs; they hold only a key.
        let attrs = if node.variant.kind() == NodeKind::KeyRow {
            match node.parent.and_then(|p| self.arena.get(p)) {
                Some(owner) => &owner.attrs,
                None => return INVALID_MARKER.to_string(),
            }
        } else {
            &node.attrs
        };
        match index.column {
            0 => node.variant.label(attrs),
            1 => node.variant.detail(attrs),
            _ => String::new(),
        }
    }

    /// Edit entry point for the view: only KeyRow value cells accept edits.
    /// Parses the narrowest scalar from the text and writes through the
    /// owner's key/value store (marking the tree dirty on acceptance).
    pub fn set_data(&mut self, index: ModelIndex, text: &str) -> Result<(), ModelError> {
        let (key, owner) = {
            let node = self.node(index.node)?;
            let kr = match node.variant.as_key_row() {
                Some(kr) => kr,
                None => {
                    return Err(ModelError::WrongKind {
                        expected: "KeyRow",
                        got: node.variant.node_type(),
                    })
                }
            };
            if index.column != 1 || kr.read_only {
                return Err(ModelError::ReadOnly(kr.key.clone()));
            }
            let owner = node.parent.ok_or(ModelError::StaleNode)?;
            (kr.key.clone(), owner)
        };
        self.set_value(owner, &key, Value::parse(text))
    }

    // ========== Lazy materialization ==========

    fn materialize_slot(&mut self, parent: NodeId, pos: usize) -> Result<NodeId, ModelError> {
        let (payload, parent_kind) = {
            let node = self.node(parent)?;
            match &node.children[pos] {
                ChildSlot::Node(id) => return Ok(*id),
                ChildSlot::Raw(p) => (p.clone(), node.variant.kind()),
            }
        };

        let child = match parent_kind {
            NodeKind::Root => self.build_file_node(&payload)?,
            NodeKind::Image | NodeKind::Frame => self.build_annotation_node(&payload)?,
            _ => {
                return Err(ModelError::MalformedRecord(format!(
                    "unexpected lazy payload under a {:?} node",
                    parent_kind
                )))
            }
        };

        // Value swap at a fixed position: row preserved, no structural event.
        {
            let node = self.node_mut_infallible(parent);
            node.children[pos] = ChildSlot::Node(child);
            node.refresh_loaded();
        }
        {
            let c = self.node_mut_infallible(child);
            c.parent = Some(parent);
            c.row = pos;
        }
        Ok(child)
    }

    fn build_file_node(&mut self, record: &serde_json::Value) -> Result<NodeId, ModelError> {
        let obj = record
            .as_object()
            .ok_or_else(|| ModelError::MalformedRecord("file record is not an object".into()))?;

        let mut hidden: Vec<String> = self.extra_hidden.iter().cloned().collect();
        hidden.push(K_FILENAME.to_string());
        let mut attrs = Attrs::with_hidden(hidden);
        for (k, v) in obj {
            if k == K_ANNOTATIONS || k == K_FRAMES {
                continue;
            }
            match Value::from_json(v) {
                Some(value) => attrs.set(k.clone(), value),
                None => warn!("skipping non-scalar file attribute '{}'", k),
            }
        }

        // Class tag resolves to a closed variant once, at construction.
        let class = obj.get(K_CLASS).and_then(|v| v.as_str()).unwrap_or(CLASS_IMAGE);
        let is_video = class == CLASS_VIDEO;

        let mut slots = self.make_key_rows(&attrs);
        let id = if is_video {
            let id = self.arena.alloc(Node::new(VideoVariant.into(), attrs));
            // Frames are built eagerly; only their annotations stay deferred.
            if let Some(frames) = obj.get(K_FRAMES).and_then(|v| v.as_array()) {
                for frame in frames {
                    let frame_id = self.build_frame_node(frame)?;
                    slots.push(ChildSlot::Node(frame_id));
                }
            }
            id
        } else {
            let id = self.arena.alloc(Node::new(ImageVariant.into(), attrs));
            if let Some(anns) = obj.get(K_ANNOTATIONS).and_then(|v| v.as_array()) {
                for ann in anns {
                    slots.push(ChildSlot::Raw(ann.clone()));
                }
            }
            id
        };
        self.adopt_slots(id, slots);
        Ok(id)
    }

    fn build_frame_node(&mut self, record: &serde_json::Value) -> Result<NodeId, ModelError> {
        let obj = record
            .as_object()
            .ok_or_else(|| ModelError::MalformedRecord("frame record is not an object".into()))?;

        let mut attrs = Attrs::with_hidden(self.extra_hidden.iter().cloned());
        for (k, v) in obj {
            if k == K_ANNOTATIONS {
                continue;
            }
            match Value::from_json(v) {
                Some(value) => attrs.set(k.clone(), value),
                None => warn!("skipping non-scalar frame attribute '{}'", k),
            }
        }

        let mut slots = self.make_key_rows(&attrs);
        if let Some(anns) = obj.get(K_ANNOTATIONS).and_then(|v| v.as_array()) {
            for ann in anns {
                slots.push(ChildSlot::Raw(ann.clone()));
            }
        }
        let id = self.arena.alloc(Node::new(FrameVariant.into(), attrs));
        self.adopt_slots(id, slots);
        Ok(id)
    }

    fn build_annotation_node(&mut self, record: &serde_json::Value) -> Result<NodeId, ModelError> {
        let obj = record.as_object().ok_or_else(|| {
            ModelError::MalformedRecord("annotation record is not an object".into())
        })?;

        let mut attrs = Attrs::with_hidden(self.extra_hidden.iter().cloned());
        for (k, v) in obj {
            match Value::from_json(v) {
                Some(value) => attrs.set(k.clone(), value),
                None => warn!("skipping non-scalar annotation attribute '{}'", k),
            }
        }
        let slots = self.make_key_rows(&attrs);
        let id = self
            .arena
            .alloc(Node::new(AnnotationVariant.into(), attrs));
        self.adopt_slots(id, slots);
        Ok(id)
    }

    /// KeyRow children for every visible key, sorted by key.
    fn make_key_rows(&mut self, attrs: &Attrs) -> Vec<ChildSlot> {
        let mut keys = attrs.visible_keys();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let id = self
                    .arena
                    .alloc(Node::new(KeyRowVariant::new(key).into(), Attrs::new()));
                ChildSlot::Node(id)
            })
            .collect()
    }

    /// Install freshly built child slots, wiring parent links and rows.
    /// Used only during node construction, never on live children.
    fn adopt_slots(&mut self, parent: NodeId, slots: Vec<ChildSlot>) {
        for (i, slot) in slots.iter().enumerate() {
            if let ChildSlot::Node(id) = slot {
                let c = self.node_mut_infallible(*id);
                c.parent = Some(parent);
                c.row = i;
            }
        }
        let p = self.node_mut_infallible(parent);
        p.children = slots;
        p.refresh_loaded();
    }
}
