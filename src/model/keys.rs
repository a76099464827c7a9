//! Attribute key constants for node attrs access.
//!
//! Avoid string typos, enable IDE autocomplete.
//! Usage: `tree.value(node, K_CLASS)`

// === Identity / classification ===
/// Annotation or file class tag ("image", "video", "rect", "point", ...)
pub const K_CLASS: &str = "class";
/// Source file path (hidden on File nodes)
pub const K_FILENAME: &str = "filename";
/// Annotation geometry type discriminator (used for interpolation matching)
pub const K_TYPE: &str = "type";

// === Workflow flags (always hidden) ===
/// Node still awaits manual labeling; interpolation may overwrite it
pub const K_UNLABELED: &str = "unlabeled";
/// Node carries machine-produced values pending confirmation
pub const K_UNCONFIRMED: &str = "unconfirmed";

// === Frame attributes ===
/// Frame number within its video
pub const K_NUM: &str = "num";
/// Frame timestamp in seconds
pub const K_TIMESTAMP: &str = "timestamp";

// === Geometry ===
pub const K_X: &str = "x";
pub const K_Y: &str = "y";
pub const K_WIDTH: &str = "width";
pub const K_HEIGHT: &str = "height";

// === Ingest/egress container keys (never stored as attrs) ===
/// Child annotation list on file and frame records
pub const K_ANNOTATIONS: &str = "annotations";
/// Child frame list on video file records
pub const K_FRAMES: &str = "frames";

// === Class tag values ===
pub const CLASS_IMAGE: &str = "image";
pub const CLASS_VIDEO: &str = "video";

/// Sentinel empty key kept in every attrs store (see `model::attrs` docs).
pub const K_SENTINEL: &str = "";
