//! Copy-forward: seed a frame with the previous frame's annotations.
//!
//! The common labeling loop on video: most objects persist between adjacent
//! frames, so the previous frame's annotations are copied in as unconfirmed
//! proposals and the labeler only adjusts. Copies that would land on top of
//! an existing annotation (overlap above the threshold) are suppressed, and
//! annotations copied earlier in the same run count as existing - two
//! near-identical sources cannot both land.

use std::collections::HashSet;

use anyhow::{bail, Result};
use log::{debug, info};

use crate::model::attrs::Attrs;
use crate::model::keys::{K_CLASS, K_HEIGHT, K_SENTINEL, K_UNCONFIRMED, K_WIDTH, K_X, K_Y};
use crate::model::node::NodeId;
use crate::model::value::Value;
use crate::model::variant::NodeBehavior;
use crate::tree::AnnotationTree;

/// How two boxes' overlap is scored against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapMode {
    /// Intersection over union
    Iou,
    /// Intersection over the smaller box's area; catches a small box fully
    /// inside a large one, which IoU scores low
    MinArea,
}

#[derive(Debug)]
pub struct CopyForwardOpts {
    /// Restrict copying to these class tags; None copies every class.
    pub classes: Option<HashSet<String>>,
    /// Suppress a copy when it overlaps an existing annotation above this;
    /// None disables suppression entirely.
    pub overlap_threshold: Option<f64>,
    /// How many previous frames to copy from; zero copies nothing.
    pub lookback: usize,
    /// Attribute-name prefix of the geometry keys (class dependent).
    pub prefix: String,
    pub mode: OverlapMode,
}

impl Default for CopyForwardOpts {
    fn default() -> Self {
        Self {
            classes: None,
            overlap_threshold: Some(0.5),
            lookback: 1,
            prefix: String::new(),
            mode: OverlapMode::Iou,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bbox {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Bbox {
    fn from_attrs(attrs: &Attrs, prefix: &str) -> Option<Bbox> {
        Some(Bbox {
            x: attrs.get_f64(&format!("{}{}", prefix, K_X))?,
            y: attrs.get_f64(&format!("{}{}", prefix, K_Y))?,
            w: attrs.get_f64(&format!("{}{}", prefix, K_WIDTH))?,
            h: attrs.get_f64(&format!("{}{}", prefix, K_HEIGHT))?,
        })
    }

    fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    fn intersection(&self, other: &Bbox) -> f64 {
        let w = (self.x + self.w).min(other.x + other.w) - self.x.max(other.x);
        let h = (self.y + self.h).min(other.y + other.h) - self.y.max(other.y);
        w.max(0.0) * h.max(0.0)
    }

    fn overlap(&self, other: &Bbox, mode: OverlapMode) -> f64 {
        let inter = self.intersection(other);
        let denom = match mode {
            OverlapMode::Iou => self.area() + other.area() - inter,
            OverlapMode::MinArea => self.area().min(other.area()),
        };
        if denom <= 0.0 {
            return 0.0;
        }
        inter / denom
    }
}

/// Copy annotations from the preceding sibling frames (nearest first, up to
/// the lookback count) into `current`. Returns the number of annotations
/// copied.
pub fn copy_forward(
    tree: &mut AnnotationTree,
    current: NodeId,
    opts: &CopyForwardOpts,
) -> Result<usize> {
    if !tree.node(current)?.variant().is_frame_like() {
        bail!(
            "copy forward target must be an image or frame, got {}",
            tree.node(current)?.variant().node_type()
        );
    }

    let mut sources: Vec<NodeId> = Vec::new();
    let mut cursor = current;
    for _ in 0..opts.lookback {
        // Frame-aware walk: KeyRow siblings are never sources
        match tree.prev_frame_sibling(cursor)? {
            Some(prev) => {
                sources.push(prev);
                cursor = prev;
            }
            None => break,
        }
    }
    if sources.is_empty() {
        info!("copy forward: no preceding frame");
        return Ok(0);
    }

    // Snapshot source attribute sets before mutating the target
    let mut candidates: Vec<Vec<(String, Value)>> = Vec::new();
    for source in sources {
        for ann in tree.annotation_children(source)? {
            let attrs = tree.attrs(ann)?;
            if let Some(classes) = &opts.classes {
                let class = attrs.get_str(K_CLASS).unwrap_or_default();
                if !classes.contains(class) {
                    continue;
                }
            }
            candidates.push(
                attrs
                    .iter()
                    .filter(|(k, _)| k.as_str() != K_SENTINEL)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }
    }

    let mut occupied: Vec<Bbox> = Vec::new();
    for ann in tree.annotation_children(current)? {
        if let Some(bb) = Bbox::from_attrs(tree.attrs(ann)?, &opts.prefix) {
            occupied.push(bb);
        }
    }

    let mut copied = 0;
    for mut pairs in candidates {
        let bb = pairs_bbox(&pairs, &opts.prefix);
        if let (Some(threshold), Some(bb)) = (opts.overlap_threshold, bb) {
            let blocked = occupied
                .iter()
                .any(|existing| bb.overlap(existing, opts.mode) > threshold);
            if blocked {
                debug!("copy forward: suppressed overlapping candidate");
                continue;
            }
        }
        pairs.push((K_UNCONFIRMED.to_string(), Value::Bool(true)));
        tree.add_annotation(current, pairs)?;
        if let Some(bb) = bb {
            occupied.push(bb);
        }
        copied += 1;
    }
    info!("copy forward: copied {} annotation(s)", copied);
    Ok(copied)
}

fn pairs_bbox(pairs: &[(String, Value)], prefix: &str) -> Option<Bbox> {
    let get = |suffix: &str| {
        pairs
            .iter()
            .find(|(k, _)| *k == format!("{}{}", prefix, suffix))
            .and_then(|(_, v)| v.as_f64())
    };
    Some(Bbox {
        x: get(K_X)?,
        y: get(K_Y)?,
        w: get(K_WIDTH)?,
        h: get(K_HEIGHT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame_pair(prev_anns: serde_json::Value, cur_anns: serde_json::Value) -> AnnotationTree {
        AnnotationTree::with_raw_files(vec![json!({
            "class": "video",
            "filename": "clip.mp4",
            "frames": [
                {"num": 0, "annotations": prev_anns},
                {"num": 1, "annotations": cur_anns}
            ]
        })])
    }

    fn second_frame(tree: &mut AnnotationTree) -> NodeId {
        let root = tree.root();
        let video = tree.child_at(root, 0).unwrap();
        let count = tree.row_count(video).unwrap();
        tree.child_at(video, count - 1).unwrap()
    }

    #[test]
    fn test_copies_into_empty_frame() {
        let mut tree = frame_pair(
            json!([{"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0}]),
            json!([]),
        );
        let frame = second_frame(&mut tree);

        let copied = copy_forward(&mut tree, frame, &CopyForwardOpts::default()).unwrap();
        assert_eq!(copied, 1);

        let anns = tree.annotation_children(frame).unwrap();
        assert_eq!(anns.len(), 1);
        let attrs = tree.attrs(anns[0]).unwrap();
        assert_eq!(attrs.get_str(K_CLASS), Some("rect"));
        assert_eq!(attrs.get_f64("width"), Some(10.0));
        // Copies arrive flagged for review
        assert!(tree.is_unconfirmed(anns[0]));
    }

    #[test]
    fn test_overlap_suppresses_copy() {
        // Shifted by one pixel: IoU 81/119 ≈ 0.68, above the 0.5 default
        let mut tree = frame_pair(
            json!([{"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0}]),
            json!([{"class": "rect", "x": 1.0, "y": 1.0, "width": 10.0, "height": 10.0}]),
        );
        let frame = second_frame(&mut tree);

        let copied = copy_forward(&mut tree, frame, &CopyForwardOpts::default()).unwrap();
        assert_eq!(copied, 0);
        assert_eq!(tree.annotation_children(frame).unwrap().len(), 1);
    }

    #[test]
    fn test_distant_box_copies_past_occupied() {
        let mut tree = frame_pair(
            json!([
                {"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0},
                {"class": "rect", "x": 100.0, "y": 100.0, "width": 10.0, "height": 10.0}
            ]),
            json!([{"class": "rect", "x": 1.0, "y": 1.0, "width": 10.0, "height": 10.0}]),
        );
        let frame = second_frame(&mut tree);

        let copied = copy_forward(&mut tree, frame, &CopyForwardOpts::default()).unwrap();
        assert_eq!(copied, 1);
    }

    #[test]
    fn test_earlier_copy_blocks_duplicate_source() {
        // Two near-identical sources: the first lands, the second is blocked
        // by the copy just made
        let mut tree = frame_pair(
            json!([
                {"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0},
                {"class": "rect", "x": 1.0, "y": 1.0, "width": 10.0, "height": 10.0}
            ]),
            json!([]),
        );
        let frame = second_frame(&mut tree);

        let copied = copy_forward(&mut tree, frame, &CopyForwardOpts::default()).unwrap();
        assert_eq!(copied, 1);
    }

    #[test]
    fn test_class_filter() {
        let mut tree = frame_pair(
            json!([
                {"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0},
                {"class": "point", "x": 50.0, "y": 50.0}
            ]),
            json!([]),
        );
        let frame = second_frame(&mut tree);

        let opts = CopyForwardOpts {
            classes: Some(["point".to_string()].into()),
            ..Default::default()
        };
        let copied = copy_forward(&mut tree, frame, &opts).unwrap();
        assert_eq!(copied, 1);
        let anns = tree.annotation_children(frame).unwrap();
        assert_eq!(tree.attrs(anns[0]).unwrap().get_str(K_CLASS), Some("point"));
    }

    #[test]
    fn test_boxless_candidate_copies_unconditionally() {
        // A point has no width/height: overlap suppression cannot apply
        let mut tree = frame_pair(
            json!([{"class": "point", "x": 5.0, "y": 5.0}]),
            json!([{"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0}]),
        );
        let frame = second_frame(&mut tree);

        let copied = copy_forward(&mut tree, frame, &CopyForwardOpts::default()).unwrap();
        assert_eq!(copied, 1);
    }

    #[test]
    fn test_lookback_reaches_past_empty_frame() {
        let mut tree = AnnotationTree::with_raw_files(vec![json!({
            "class": "video",
            "filename": "clip.mp4",
            "frames": [
                {"num": 0, "annotations": [
                    {"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0}
                ]},
                {"num": 1, "annotations": []},
                {"num": 2, "annotations": []}
            ]
        })]);
        let frame = second_frame(&mut tree);

        // Default lookback of 1 only sees the empty neighbor
        assert_eq!(copy_forward(&mut tree, frame, &CopyForwardOpts::default()).unwrap(), 0);

        let opts = CopyForwardOpts {
            lookback: 2,
            ..Default::default()
        };
        assert_eq!(copy_forward(&mut tree, frame, &opts).unwrap(), 1);
    }

    #[test]
    fn test_video_attribute_row_is_not_a_source() {
        // fps is visible, so its KeyRow sits at row 0 of the same child
        // list as the frames; the lookback walk must skip it
        let mut tree = AnnotationTree::with_raw_files(vec![json!({
            "class": "video",
            "filename": "clip.mp4",
            "fps": 25.0,
            "frames": [
                {"num": 0, "annotations": []}
            ]
        })]);
        let root = tree.root();
        let video = tree.child_at(root, 0).unwrap();
        let count = tree.row_count(video).unwrap();
        let frame = tree.child_at(video, count - 1).unwrap();

        let opts = CopyForwardOpts {
            lookback: 5,
            ..Default::default()
        };
        assert_eq!(copy_forward(&mut tree, frame, &opts).unwrap(), 0);
        assert!(tree.annotation_children(frame).unwrap().is_empty());
    }

    #[test]
    fn test_zero_lookback_copies_nothing() {
        let mut tree = frame_pair(
            json!([{"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0}]),
            json!([]),
        );
        let frame = second_frame(&mut tree);
        let opts = CopyForwardOpts {
            lookback: 0,
            ..Default::default()
        };
        assert_eq!(copy_forward(&mut tree, frame, &opts).unwrap(), 0);
        assert!(tree.annotation_children(frame).unwrap().is_empty());
    }

    #[test]
    fn test_first_frame_has_no_source() {
        let mut tree = frame_pair(json!([]), json!([]));
        let root = tree.root();
        let video = tree.child_at(root, 0).unwrap();
        let count = tree.row_count(video).unwrap();
        let first = tree.child_at(video, count - 2).unwrap();

        let copied = copy_forward(&mut tree, first, &CopyForwardOpts::default()).unwrap();
        assert_eq!(copied, 0);
    }

    #[test]
    fn test_rejects_non_frame_target() {
        let mut tree = frame_pair(json!([]), json!([]));
        let root = tree.root();
        let video = tree.child_at(root, 0).unwrap();
        assert!(copy_forward(&mut tree, video, &CopyForwardOpts::default()).is_err());
    }

    #[test]
    fn test_min_area_mode_catches_contained_box() {
        // Small box fully inside a large one: IoU is low, MinArea is 1.0
        let mut tree = frame_pair(
            json!([{"class": "rect", "x": 10.0, "y": 10.0, "width": 5.0, "height": 5.0}]),
            json!([{"class": "rect", "x": 0.0, "y": 0.0, "width": 100.0, "height": 100.0}]),
        );
        let frame = second_frame(&mut tree);

        let iou_opts = CopyForwardOpts::default();
        assert_eq!(copy_forward(&mut tree, frame, &iou_opts).unwrap(), 1);

        let mut tree = frame_pair(
            json!([{"class": "rect", "x": 10.0, "y": 10.0, "width": 5.0, "height": 5.0}]),
            json!([{"class": "rect", "x": 0.0, "y": 0.0, "width": 100.0, "height": 100.0}]),
        );
        let frame = second_frame(&mut tree);
        let min_opts = CopyForwardOpts {
            mode: OverlapMode::MinArea,
            ..Default::default()
        };
        assert_eq!(copy_forward(&mut tree, frame, &min_opts).unwrap(), 0);
    }
}
