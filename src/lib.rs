//! annota - hierarchical annotation data model.
//!
//! The core of an image/video labeling tool: a lazily materialized tree of
//! Root → File → (Frame) → Annotation → KeyRow nodes over flat JSON records,
//! exposed through a row/column model facade with change notifications.
//!
//! Architecture:
//! - `model` - attribute stores, scalar values, node variants, the arena
//! - `tree` - the `AnnotationTree` facade: structure, key/value, indexing
//! - `events` - closed notification enum and the observer hub
//! - `ingest` - JSON ingest/egress with verbatim round-trip of untouched data
//! - `iter` - depth-first traversal and aggregation
//! - `ops` - copy-forward and interpolation across frames
//! - `registry` - annotation class registration
//! - `source_cache` - bounded LRU for decoded media

pub mod error;
pub mod events;
pub mod ingest;
pub mod iter;
pub mod model;
pub mod ops;
pub mod registry;
pub mod source_cache;
pub mod tree;

pub use error::ModelError;
pub use events::{SubscriptionId, TreeEvent};
pub use ingest::{export, export_str, ingest, ingest_str};
pub use iter::DepthFirstIter;
pub use model::{Attrs, NodeId, NodeKind, Value};
pub use ops::{copy_forward, interpolate, CopyForwardOpts, InterpolateOpts};
pub use registry::{ClassHandle, ClassRegistry};
pub use source_cache::SourceCache;
pub use tree::{AnnotationTree, Highlight, ModelIndex};
