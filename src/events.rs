//! Tree change notification over a closed event set.
//!
//! Observers subscribe with callbacks (immediate, synchronous invocation);
//! every emitted event is also queued for deferred batch processing via
//! `poll()`. Structural mutations are bracketed: the about-to-change event is
//! delivered before the tree mutates, the changed event after - observers can
//! rely on that ordering, and there is no coalescing.
//!
//! The whole model is single-threaded by design, so dispatch is plain
//! function calls into the registered callbacks.

use crate::model::node::NodeId;

/// Events emitted by the annotation tree.
///
/// Row ranges are inclusive and refer to child positions under `parent`.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    /// Rows [first, last] will be inserted under parent
    RowsAboutToBeInserted { parent: NodeId, first: usize, last: usize },
    /// Rows [first, last] were inserted under parent
    RowsInserted { parent: NodeId, first: usize, last: usize },
    /// Rows [first, last] will be removed from parent
    RowsAboutToBeRemoved { parent: NodeId, first: usize, last: usize },
    /// Rows [first, last] were removed from parent
    RowsRemoved { parent: NodeId, first: usize, last: usize },
    /// Display data of one row changed across columns [first, last]
    DataChanged { node: NodeId, first_column: usize, last_column: usize },
    /// The tree-wide unsaved-changes flag flipped
    DirtyChanged(bool),
}

impl TreeEvent {
    /// Events that represent a completed mutation and therefore flip the
    /// dirty flag through the tree's shared emit handler.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            TreeEvent::RowsInserted { .. }
                | TreeEvent::RowsRemoved { .. }
                | TreeEvent::DataChanged { .. }
        )
    }
}

/// Subscription handle returned by `Observers::subscribe`.
pub type SubscriptionId = usize;

type Callback = Box<dyn Fn(&TreeEvent)>;

/// Observer registry with deferred queue.
#[derive(Default)]
pub struct Observers {
    subs: Vec<Option<Callback>>,
    queue: Vec<TreeEvent>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.subs.iter().flatten().count())
            .field("queue_len", &self.queue.len())
            .finish()
    }
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback; invoked synchronously on every emit.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&TreeEvent) + 'static,
    {
        self.subs.push(Some(Box::new(callback)));
        self.subs.len() - 1
    }

    /// Remove a subscription. Returns false if the id was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self.subs.get_mut(id) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Invoke callbacks immediately, then queue for deferred processing.
    pub fn emit(&mut self, event: TreeEvent) {
        for cb in self.subs.iter().flatten() {
            cb(&event);
        }
        self.queue.push(event);
    }

    /// Drain all queued events since the last poll.
    pub fn poll(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.queue)
    }

    pub fn has_subscribers(&self) -> bool {
        self.subs.iter().any(Option::is_some)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn node_id() -> NodeId {
        NodeId { index: 0, generation: 0 }
    }

    #[test]
    fn test_subscribe_emit_immediate() {
        let mut obs = Observers::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);

        obs.subscribe(move |_| c.set(c.get() + 1));

        obs.emit(TreeEvent::DirtyChanged(true));
        assert_eq!(count.get(), 1);

        obs.emit(TreeEvent::DirtyChanged(false));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_emit_queues_for_poll() {
        let mut obs = Observers::new();
        obs.emit(TreeEvent::DirtyChanged(true));
        obs.emit(TreeEvent::RowsInserted { parent: node_id(), first: 0, last: 0 });

        let events = obs.poll();
        assert_eq!(events.len(), 2);
        assert_eq!(obs.poll().len(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut obs = Observers::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);

        let id = obs.subscribe(move |_| c.set(c.get() + 1));
        obs.emit(TreeEvent::DirtyChanged(true));
        assert_eq!(count.get(), 1);

        assert!(obs.unsubscribe(id));
        assert!(!obs.unsubscribe(id));

        obs.emit(TreeEvent::DirtyChanged(false));
        assert_eq!(count.get(), 1);
        // Events still queue without subscribers
        assert_eq!(obs.queue_len(), 2);
    }

    #[test]
    fn test_mutation_classification() {
        let id = node_id();
        assert!(TreeEvent::RowsInserted { parent: id, first: 0, last: 0 }.is_mutation());
        assert!(TreeEvent::RowsRemoved { parent: id, first: 0, last: 0 }.is_mutation());
        assert!(TreeEvent::DataChanged { node: id, first_column: 0, last_column: 1 }.is_mutation());
        assert!(!TreeEvent::RowsAboutToBeInserted { parent: id, first: 0, last: 0 }.is_mutation());
        assert!(!TreeEvent::DirtyChanged(true).is_mutation());
    }
}
