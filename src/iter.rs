//! Depth-first traversal and tree-wide aggregation.
//!
//! Traversal is pre-order and materializes lazy children as it descends, so
//! the iterator borrows the tree mutably - one walker at a time, no aliasing
//! with concurrent structural edits. A child whose payload fails to
//! materialize is logged and skipped; the walk continues past it.

use std::collections::BTreeSet;

use log::error;

use crate::model::keys::K_CLASS;
use crate::model::node::NodeId;
use crate::model::variant::NodeKind;
use crate::tree::AnnotationTree;

type NodePredicate = Box<dyn Fn(&AnnotationTree, NodeId) -> bool>;

/// Pre-order walker over a subtree, the start node included.
pub struct DepthFirstIter<'a> {
    tree: &'a mut AnnotationTree,
    stack: Vec<(NodeId, usize)>,
    max_depth: Option<usize>,
    filter: Option<NodeKind>,
    predicate: Option<NodePredicate>,
}

impl<'a> DepthFirstIter<'a> {
    fn new(tree: &'a mut AnnotationTree, start: NodeId) -> Self {
        Self {
            tree,
            stack: vec![(start, 0)],
            max_depth: None,
            filter: None,
            predicate: None,
        }
    }

    /// Limit descent to `depth` levels below the start node.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Yield only nodes of the given kind (descent is unaffected).
    pub fn of_kind(mut self, kind: NodeKind) -> Self {
        self.filter = Some(kind);
        self
    }

    /// Yield only nodes passing the predicate (descent is unaffected).
    pub fn matching<F>(mut self, pred: F) -> Self
    where
        F: Fn(&AnnotationTree, NodeId) -> bool + 'static,
    {
        self.predicate = Some(Box::new(pred));
        self
    }
}

impl Iterator for DepthFirstIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some((id, depth)) = self.stack.pop() {
            if self.max_depth.map_or(true, |max| depth < max) {
                let count = self.tree.row_count(id).unwrap_or(0);
                // Reverse push keeps children in document order on the stack
                for i in (0..count).rev() {
                    match self.tree.child_at(id, i) {
                        Ok(child) => self.stack.push((child, depth + 1)),
                        Err(err) => error!("skipping unreadable child {} of node: {}", i, err),
                    }
                }
            }
            let kind_ok = match self.filter {
                Some(kind) => self.tree.kind(id).map(|k| k == kind).unwrap_or(false),
                None => true,
            };
            let pred_ok = match &self.predicate {
                Some(pred) => pred(self.tree, id),
                None => true,
            };
            if kind_ok && pred_ok {
                return Some(id);
            }
        }
        None
    }
}

impl AnnotationTree {
    /// Walk a subtree depth-first, materializing as needed.
    pub fn iter_depth_first(&mut self, start: NodeId) -> DepthFirstIter<'_> {
        DepthFirstIter::new(self, start)
    }

    /// Total number of annotations in the tree. Forces full materialization.
    pub fn annotation_count(&mut self) -> usize {
        let root = self.root();
        self.iter_depth_first(root)
            .of_kind(NodeKind::Annotation)
            .count()
    }

    /// Distinct values of one attribute across every annotation, rendered as
    /// display strings (the class-summary use case).
    pub fn unique_values(&mut self, key: &str) -> BTreeSet<String> {
        let root = self.root();
        let annotations: Vec<NodeId> = self
            .iter_depth_first(root)
            .of_kind(NodeKind::Annotation)
            .collect();
        let mut out = BTreeSet::new();
        for id in annotations {
            if let Ok(attrs) = self.attrs(id) {
                if let Some(v) = attrs.get(key) {
                    out.insert(v.to_string());
                }
            }
        }
        out
    }

    /// Distinct annotation classes present in the tree.
    pub fn annotation_classes(&mut self) -> BTreeSet<String> {
        self.unique_values(K_CLASS)
    }
}
