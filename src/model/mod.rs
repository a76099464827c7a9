//! Data model: attribute storage, node variants and the arena they live in.

pub mod attrs;
pub mod keys;
pub mod node;
pub mod value;
pub mod variant;

pub use attrs::Attrs;
pub use node::{Arena, ChildSlot, Node, NodeId};
pub use value::Value;
pub use variant::{NodeBehavior, NodeKind, NodeVariant};
