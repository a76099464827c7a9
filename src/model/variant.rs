//! Node variants - closed set of node types in the annotation tree.
//!
//! The ingest format tags each file record with a class string; the tag is
//! resolved once at materialization into a closed enum.
//! Per-level display/edit behavior lives in the `NodeBehavior` trait,
//! dispatched over `NodeVariant` without dynamic allocation.

use enum_dispatch::enum_dispatch;

use super::attrs::Attrs;
use super::keys::{K_CLASS, K_FILENAME, K_NUM, K_TIMESTAMP};

/// Kind discriminant for filtering and type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Image,
    Video,
    Frame,
    Annotation,
    KeyRow,
}

/// Per-level behavior: identification and two-column display text.
///
/// `label` renders column 0 (hierarchy text), `detail` column 1 (value text).
/// For KeyRow nodes the tree passes the *owner's* attrs, since a KeyRow holds
/// no state beyond its key reference.
#[enum_dispatch]
pub trait NodeBehavior {
    fn kind(&self) -> NodeKind;

    fn node_type(&self) -> &'static str;

    fn label(&self, attrs: &Attrs) -> String;

    fn detail(&self, _attrs: &Attrs) -> String {
        String::new()
    }

    /// Whether the view may edit this row's value column.
    fn editable(&self) -> bool {
        false
    }
}

/// Enum containing all possible node variants.
#[enum_dispatch(NodeBehavior)]
#[derive(Debug, Clone)]
pub enum NodeVariant {
    Root(RootVariant),
    Image(ImageVariant),
    Video(VideoVariant),
    Frame(FrameVariant),
    Annotation(AnnotationVariant),
    KeyRow(KeyRowVariant),
}

impl NodeVariant {
    pub fn is_frame_like(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::Image | NodeKind::Frame
        )
    }

    pub fn as_key_row(&self) -> Option<&KeyRowVariant> {
        match self {
            NodeVariant::KeyRow(kr) => Some(kr),
            _ => None,
        }
    }
}

/// Invisible tree root; owns the file list.
#[derive(Debug, Clone, Default)]
pub struct RootVariant;

impl NodeBehavior for RootVariant {
    fn kind(&self) -> NodeKind {
        NodeKind::Root
    }

    fn node_type(&self) -> &'static str {
        "Root"
    }

    fn label(&self, _attrs: &Attrs) -> String {
        String::new()
    }
}

/// Image file; annotation children are materialized lazily.
#[derive(Debug, Clone, Default)]
pub struct ImageVariant;

impl NodeBehavior for ImageVariant {
    fn kind(&self) -> NodeKind {
        NodeKind::Image
    }

    fn node_type(&self) -> &'static str {
        "Image"
    }

    fn label(&self, attrs: &Attrs) -> String {
        attrs.get_str(K_FILENAME).unwrap_or("<unnamed>").to_string()
    }
}

/// Video file; frame children are built eagerly, their annotations lazily.
#[derive(Debug, Clone, Default)]
pub struct VideoVariant;

impl NodeBehavior for VideoVariant {
    fn kind(&self) -> NodeKind {
        NodeKind::Video
    }

    fn node_type(&self) -> &'static str {
        "Video"
    }

    fn label(&self, attrs: &Attrs) -> String {
        attrs.get_str(K_FILENAME).unwrap_or("<unnamed>").to_string()
    }
}

/// Single video frame; behaves as an image-like annotation container.
#[derive(Debug, Clone, Default)]
pub struct FrameVariant;

impl NodeBehavior for FrameVariant {
    fn kind(&self) -> NodeKind {
        NodeKind::Frame
    }

    fn node_type(&self) -> &'static str {
        "Frame"
    }

    fn label(&self, attrs: &Attrs) -> String {
        match attrs.get(K_NUM) {
            Some(num) => format!("Frame {}", num),
            None => "Frame".to_string(),
        }
    }

    fn detail(&self, attrs: &Attrs) -> String {
        attrs
            .get(K_TIMESTAMP)
            .map(|ts| ts.to_string())
            .unwrap_or_default()
    }
}

/// One label instance; attrs carry the full attribute set.
#[derive(Debug, Clone, Default)]
pub struct AnnotationVariant;

impl NodeBehavior for AnnotationVariant {
    fn kind(&self) -> NodeKind {
        NodeKind::Annotation
    }

    fn node_type(&self) -> &'static str {
        "Annotation"
    }

    fn label(&self, attrs: &Attrs) -> String {
        attrs.get_str(K_CLASS).unwrap_or("<no class>").to_string()
    }
}

/// Synthetic leaf exposing one (key, value) pair of its owner for display.
#[derive(Debug, Clone)]
pub struct KeyRowVariant {
    pub key: String,
    pub read_only: bool,
}

impl KeyRowVariant {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            read_only: false,
        }
    }
}

impl NodeBehavior for KeyRowVariant {
    fn kind(&self) -> NodeKind {
        NodeKind::KeyRow
    }

    fn node_type(&self) -> &'static str {
        "KeyRow"
    }

    fn label(&self, _attrs: &Attrs) -> String {
        self.key.clone()
    }

    fn detail(&self, attrs: &Attrs) -> String {
        attrs
            .get(&self.key)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn editable(&self) -> bool {
        !self.read_only
    }
}
