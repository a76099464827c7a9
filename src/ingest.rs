//! JSON ingest and egress for annotation documents.
//!
//! Ingest is shallow: file records are validated to be objects and wrapped
//! as lazy payloads, nothing else is touched until the tree is browsed.
//! Export mirrors that: slots never materialized are emitted verbatim, so an
//! untouched document round-trips byte-for-byte in content (key order within
//! rebuilt records may differ). Materialized nodes are rebuilt from their
//! attribute stores, with the `annotations`/`frames` arrays re-attached.

use log::info;

use crate::error::ModelError;
use crate::model::keys::{K_ANNOTATIONS, K_FRAMES};
use crate::model::node::{ChildSlot, NodeId};
use crate::model::variant::NodeKind;
use crate::tree::AnnotationTree;

/// Build a tree from a list of file records. Every record must be a JSON
/// object; payload contents are validated later, at materialization.
pub fn ingest(records: Vec<serde_json::Value>) -> Result<AnnotationTree, ModelError> {
    for (i, record) in records.iter().enumerate() {
        if !record.is_object() {
            return Err(ModelError::MalformedRecord(format!(
                "file record {} is not an object",
                i
            )));
        }
    }
    info!("ingesting {} file record(s)", records.len());
    Ok(AnnotationTree::with_raw_files(records))
}

/// Parse a JSON array document and ingest it.
pub fn ingest_str(text: &str) -> Result<AnnotationTree, ModelError> {
    let doc: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ModelError::MalformedRecord(format!("invalid JSON document: {}", e)))?;
    match doc {
        serde_json::Value::Array(records) => ingest(records),
        _ => Err(ModelError::MalformedRecord(
            "document root is not an array".into(),
        )),
    }
}

/// Emit the current tree content as file records.
pub fn export(tree: &AnnotationTree) -> Result<Vec<serde_json::Value>, ModelError> {
    let mut out = Vec::new();
    for slot in tree.child_slots(tree.root())? {
        out.push(match slot {
            ChildSlot::Raw(payload) => payload.clone(),
            ChildSlot::Node(id) => export_file(tree, *id)?,
        });
    }
    Ok(out)
}

/// Serialize the tree as a pretty-printed JSON array document.
pub fn export_str(tree: &AnnotationTree) -> Result<String, ModelError> {
    let records = export(tree)?;
    serde_json::to_string_pretty(&records)
        .map_err(|e| ModelError::MalformedRecord(format!("serialization failed: {}", e)))
}

fn export_file(tree: &AnnotationTree, id: NodeId) -> Result<serde_json::Value, ModelError> {
    let mut obj = match tree.attrs(id)?.to_json() {
        serde_json::Value::Object(obj) => obj,
        _ => unreachable!("attrs always export as an object"),
    };
    match tree.kind(id)? {
        NodeKind::Video => {
            let mut frames = Vec::new();
            for slot in tree.child_slots(id)? {
                if let ChildSlot::Node(child) = slot {
                    if tree.kind(*child)? == NodeKind::Frame {
                        frames.push(export_frame(tree, *child)?);
                    }
                }
            }
            obj.insert(K_FRAMES.to_string(), serde_json::Value::Array(frames));
        }
        _ => {
            obj.insert(
                K_ANNOTATIONS.to_string(),
                serde_json::Value::Array(export_annotations(tree, id)?),
            );
        }
    }
    Ok(serde_json::Value::Object(obj))
}

fn export_frame(tree: &AnnotationTree, id: NodeId) -> Result<serde_json::Value, ModelError> {
    let mut obj = match tree.attrs(id)?.to_json() {
        serde_json::Value::Object(obj) => obj,
        _ => unreachable!("attrs always export as an object"),
    };
    obj.insert(
        K_ANNOTATIONS.to_string(),
        serde_json::Value::Array(export_annotations(tree, id)?),
    );
    Ok(serde_json::Value::Object(obj))
}

/// Annotation children of an image or frame node: raw payloads verbatim,
/// materialized nodes from their attrs. KeyRow children are view-only and
/// never exported.
fn export_annotations(
    tree: &AnnotationTree,
    parent: NodeId,
) -> Result<Vec<serde_json::Value>, ModelError> {
    let mut out = Vec::new();
    for slot in tree.child_slots(parent)? {
        match slot {
            ChildSlot::Raw(payload) => out.push(payload.clone()),
            ChildSlot::Node(child) => {
                if tree.kind(*child)? == NodeKind::Annotation {
                    out.push(tree.attrs(*child)?.to_json());
                }
            }
        }
    }
    Ok(out)
}
