//! Model error taxonomy.
//!
//! Structural-usage errors (bad index, wrong node kind, deleting a non-child)
//! are fatal to the attempted operation and surface immediately. Data-shape
//! errors (malformed ingest payloads) are reported at the granularity of the
//! operation touching them; they never corrupt the structural layer.

/// Errors raised by the annotation tree core.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Child index outside [0, len)
    OutOfRange { index: usize, len: usize },
    /// Node passed to a child operation is not a child of that parent
    NotAChild,
    /// Node already has a parent and cannot be inserted elsewhere
    AlreadyAttached,
    /// Operation requires a different node kind
    WrongKind { expected: &'static str, got: &'static str },
    /// Read of an absent attribute key
    KeyNotFound(String),
    /// Edit attempt on a read-only row
    ReadOnly(String),
    /// Ingest payload does not match the data contract
    MalformedRecord(String),
    /// Class tag already registered and replace was not requested
    DuplicateClass(String),
    /// NodeId refers to a node that no longer exists
    StaleNode,
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::OutOfRange { index, len } => {
                write!(f, "child index {} out of range (len {})", index, len)
            }
            ModelError::NotAChild => write!(f, "node is not a child of this parent"),
            ModelError::AlreadyAttached => write!(f, "node already has a parent"),
            ModelError::WrongKind { expected, got } => {
                write!(f, "wrong node kind: expected {}, got {}", expected, got)
            }
            ModelError::KeyNotFound(key) => write!(f, "key not found: '{}'", key),
            ModelError::ReadOnly(key) => write!(f, "key '{}' is read-only", key),
            ModelError::MalformedRecord(msg) => write!(f, "malformed record: {}", msg),
            ModelError::DuplicateClass(tag) => {
                write!(f, "class '{}' already registered (pass replace to override)", tag)
            }
            ModelError::StaleNode => write!(f, "node id refers to a deleted node"),
        }
    }
}

impl std::error::Error for ModelError {}
