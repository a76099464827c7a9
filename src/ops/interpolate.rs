//! Linear interpolation across a run of unlabeled/unconfirmed frames.
//!
//! The labeler annotates two keyframes and the frames between them are
//! filled in: annotations are matched across the boundary frames by their
//! (type, class) identity, numeric attributes lerped per intermediate frame,
//! everything else copied from the earlier boundary. All values are computed
//! before anything is written, so a bad attribute aborts the whole operation
//! without corrupting any frame.

use anyhow::{bail, Result};
use log::{error, info};

use crate::model::keys::{K_CLASS, K_SENTINEL, K_TYPE, K_UNCONFIRMED, K_UNLABELED};
use crate::model::node::NodeId;
use crate::model::value::Value;
use crate::model::variant::NodeBehavior;
use crate::tree::AnnotationTree;

/// What to do when a boundary annotation has no (type, class) partner on the
/// other boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedSlot {
    /// Log the slot and interpolate the rest
    SkipAndLog,
    /// Abort the whole operation
    Fail,
}

pub struct InterpolateOpts {
    pub unmatched: UnmatchedSlot,
    /// Which frames count as fill targets; None uses the default
    /// unlabeled-or-unconfirmed test.
    pub should_overwrite: Option<Box<dyn Fn(&AnnotationTree, NodeId) -> bool>>,
}

impl Default for InterpolateOpts {
    fn default() -> Self {
        Self {
            unmatched: UnmatchedSlot::SkipAndLog,
            should_overwrite: None,
        }
    }
}

impl std::fmt::Debug for InterpolateOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpolateOpts")
            .field("unmatched", &self.unmatched)
            .field("custom_overwrite", &self.should_overwrite.is_some())
            .finish()
    }
}

impl InterpolateOpts {
    fn overwritable(&self, tree: &AnnotationTree, id: NodeId) -> bool {
        match &self.should_overwrite {
            Some(pred) => pred(tree, id),
            None => tree.is_unlabeled(id) || tree.is_unconfirmed(id),
        }
    }
}

/// Fill the run of overwritable frames ending just before `last`.
///
/// `last` is the freshly labeled frame; the walk goes backwards through its
/// overwritable siblings to the nearest labeled frame, which becomes the
/// other boundary. Returns the number of frames written.
pub fn interpolate(
    tree: &mut AnnotationTree,
    last: NodeId,
    opts: &InterpolateOpts,
) -> Result<usize> {
    if !tree.node(last)?.variant().is_frame_like() {
        bail!(
            "interpolation target must be an image or frame, got {}",
            tree.node(last)?.variant().node_type()
        );
    }
    if opts.overwritable(tree, last) {
        bail!("interpolation target is itself unlabeled or unconfirmed");
    }

    // Walk back over the fill run to the labeled boundary. Frame-aware:
    // KeyRow siblings in the same child list are never boundary candidates.
    let mut run: Vec<NodeId> = Vec::new();
    let first;
    let mut cursor = last;
    loop {
        match tree.prev_frame_sibling(cursor)? {
            None => bail!("no labeled frame found before the target"),
            Some(prev) if opts.overwritable(tree, prev) => {
                run.push(prev);
                cursor = prev;
            }
            Some(prev) => {
                first = prev;
                break;
            }
        }
    }
    if run.is_empty() {
        info!("interpolate: no frames to fill");
        return Ok(0);
    }
    run.reverse(); // chronological order

    let first_anns = tree.annotation_children(first)?;
    let last_anns = tree.annotation_children(last)?;
    if first_anns.len() != last_anns.len() {
        bail!(
            "annotation count mismatch between boundary frames: {} vs {}",
            first_anns.len(),
            last_anns.len()
        );
    }

    // Match boundary annotations by (type, class) identity
    let mut consumed = vec![false; last_anns.len()];
    let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
    for &a in &first_anns {
        let ident = identity(tree, a)?;
        let partner = last_anns
            .iter()
            .enumerate()
            .find(|(i, &b)| !consumed[*i] && identity(tree, b).ok().as_ref() == Some(&ident));
        match partner {
            Some((i, &b)) => {
                consumed[i] = true;
                pairs.push((a, b));
            }
            None => match opts.unmatched {
                UnmatchedSlot::SkipAndLog => {
                    error!("interpolate: no partner for annotation {:?}, skipping", ident);
                }
                UnmatchedSlot::Fail => {
                    bail!("no partner for annotation {:?} on the target frame", ident)
                }
            },
        }
    }

    // Compute every intermediate value before touching the tree
    let steps = run.len();
    let mut plan: Vec<Vec<Vec<(String, Value)>>> = vec![Vec::new(); steps];
    for &(a, b) in &pairs {
        for (j, frame_plan) in plan.iter_mut().enumerate() {
            let t = (j + 1) as f64 / (steps + 1) as f64;
            frame_plan.push(blend_annotation(tree, a, b, t)?);
        }
    }

    // Write phase: replace each run frame's annotations and flag it
    for (j, &frame) in run.iter().enumerate() {
        tree.clear_annotations(frame)?;
        for pairs in plan[j].drain(..) {
            tree.add_annotation(frame, pairs)?;
        }
        tree.set_unlabeled(frame, false)?;
        tree.set_unconfirmed(frame, true)?;
    }
    info!(
        "interpolate: filled {} frame(s) with {} annotation(s) each",
        steps,
        pairs.len()
    );
    Ok(steps)
}

fn identity(tree: &AnnotationTree, ann: NodeId) -> Result<(Option<Value>, Option<Value>)> {
    let attrs = tree.attrs(ann)?;
    Ok((attrs.get(K_TYPE).cloned(), attrs.get(K_CLASS).cloned()))
}

/// One interpolated annotation at blend factor `t` between annotations
/// `a` (earlier) and `b` (later).
fn blend_annotation(
    tree: &AnnotationTree,
    a: NodeId,
    b: NodeId,
    t: f64,
) -> Result<Vec<(String, Value)>> {
    let attrs_a = tree.attrs(a)?;
    let attrs_b = tree.attrs(b)?;
    let mut out = Vec::new();
    for (key, va) in attrs_a.iter() {
        if key == K_SENTINEL || key == K_UNLABELED || key == K_UNCONFIRMED {
            continue;
        }
        let value = match attrs_b.get(key) {
            Some(vb) => blend_value(key, va, vb, t)?,
            None => va.clone(),
        };
        out.push((key.clone(), value));
    }
    out.push((K_UNCONFIRMED.to_string(), Value::Bool(true)));
    Ok(out)
}

fn blend_value(key: &str, a: &Value, b: &Value, t: f64) -> Result<Value> {
    if a.is_numeric() && b.is_numeric() {
        return Ok(lerp_scalar(a, b, t));
    }
    if let (Value::Str(sa), Value::Str(sb)) = (a, b) {
        if sa.contains(';') || sb.contains(';') {
            return blend_list(key, sa, sb, t);
        }
    }
    // Non-numeric attributes hold the earlier boundary's value
    Ok(a.clone())
}

fn lerp_scalar(a: &Value, b: &Value, t: f64) -> Value {
    let fa = a.as_f64().unwrap_or(0.0);
    let fb = b.as_f64().unwrap_or(0.0);
    let v = fa + (fb - fa) * t;
    // Integer endpoints stay integers when the blend lands on one
    if matches!((a, b), (Value::Int(_), Value::Int(_))) && v.fract() == 0.0 {
        Value::Int(v as i64)
    } else {
        Value::Float(v)
    }
}

/// Element-wise lerp of semicolon-separated numeric lists (polygon points
/// and the like). Non-numeric elements or a length mismatch abort.
fn blend_list(key: &str, a: &str, b: &str, t: f64) -> Result<Value> {
    let parse = |s: &str, side: &str| -> Result<Vec<f64>> {
        s.split(';')
            .map(|el| {
                el.trim().parse::<f64>().map_err(|_| {
                    anyhow::anyhow!("attribute '{}': non-numeric list element '{}' ({})", key, el, side)
                })
            })
            .collect()
    };
    let la = parse(a, "earlier frame")?;
    let lb = parse(b, "later frame")?;
    if la.len() != lb.len() {
        bail!(
            "attribute '{}': list length mismatch ({} vs {})",
            key,
            la.len(),
            lb.len()
        );
    }
    let blended: Vec<String> = la
        .iter()
        .zip(&lb)
        .map(|(&ea, &eb)| format!("{}", ea + (eb - ea) * t))
        .collect();
    Ok(Value::Str(blended.join(";")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_with_frames(frames: serde_json::Value) -> AnnotationTree {
        AnnotationTree::with_raw_files(vec![json!({
            "class": "video",
            "filename": "clip.mp4",
            "frames": frames
        })])
    }

    fn frame(tree: &mut AnnotationTree, i: usize) -> NodeId {
        let root = tree.root();
        let video = tree.child_at(root, 0).unwrap();
        tree.child_at(video, i).unwrap()
    }

    fn four_frame_run() -> AnnotationTree {
        tree_with_frames(json!([
            {"num": 0, "annotations": [
                {"class": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0}
            ]},
            {"num": 1, "unlabeled": true, "annotations": []},
            {"num": 2, "unlabeled": true, "annotations": []},
            {"num": 3, "annotations": [
                {"class": "rect", "x": 30.0, "y": 0.0, "width": 10.0, "height": 10.0}
            ]}
        ]))
    }

    #[test]
    fn test_lerp_across_two_gap_frames() {
        let mut tree = four_frame_run();
        let last = frame(&mut tree, 3);

        let written = interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();
        assert_eq!(written, 2);

        let f1 = frame(&mut tree, 1);
        let anns = tree.annotation_children(f1).unwrap();
        assert_eq!(anns.len(), 1);
        assert_eq!(tree.attrs(anns[0]).unwrap().get_f64("x"), Some(10.0));
        assert!(tree.is_unconfirmed(anns[0]));

        let f2 = frame(&mut tree, 2);
        let anns = tree.annotation_children(f2).unwrap();
        assert_eq!(tree.attrs(anns[0]).unwrap().get_f64("x"), Some(20.0));

        // Filled frames lose the unlabeled flag and gain unconfirmed
        assert!(!tree.is_unlabeled(f1));
        assert!(tree.is_unconfirmed(f1));
    }

    #[test]
    fn test_unconfirmed_frames_are_refilled() {
        let mut tree = four_frame_run();
        let last = frame(&mut tree, 3);
        interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();

        // Run again after adjusting the boundary: unconfirmed fills overwrite
        let f3_anns = tree.annotation_children(last).unwrap();
        tree.set_value(f3_anns[0], "x", 60.0).unwrap();
        interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();

        let f2 = frame(&mut tree, 2);
        let anns = tree.annotation_children(f2).unwrap();
        assert_eq!(tree.attrs(anns[0]).unwrap().get_f64("x"), Some(40.0));
    }

    #[test]
    fn test_integer_endpoints_stay_integers() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [{"class": "rect", "x": 0}]},
            {"num": 1, "unlabeled": true, "annotations": []},
            {"num": 2, "annotations": [{"class": "rect", "x": 20}]}
        ]));
        let last = frame(&mut tree, 2);
        interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();

        let f1 = frame(&mut tree, 1);
        let anns = tree.annotation_children(f1).unwrap();
        assert_eq!(tree.value(anns[0], "x").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_semicolon_lists_blend_elementwise() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [{"class": "poly", "points": "0;0;10;10"}]},
            {"num": 1, "unlabeled": true, "annotations": []},
            {"num": 2, "annotations": [{"class": "poly", "points": "20;10;30;20"}]}
        ]));
        let last = frame(&mut tree, 2);
        interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();

        let f1 = frame(&mut tree, 1);
        let anns = tree.annotation_children(f1).unwrap();
        assert_eq!(
            tree.value(anns[0], "points").unwrap(),
            Value::Str("10;5;20;15".to_string())
        );
    }

    #[test]
    fn test_list_length_mismatch_aborts_before_writing() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [{"class": "poly", "points": "0;0"}]},
            {"num": 1, "unlabeled": true, "annotations": []},
            {"num": 2, "annotations": [{"class": "poly", "points": "1;2;3"}]}
        ]));
        let last = frame(&mut tree, 2);
        assert!(interpolate(&mut tree, last, &InterpolateOpts::default()).is_err());

        // Nothing was written: the gap frame is untouched
        let f1 = frame(&mut tree, 1);
        assert!(tree.annotation_children(f1).unwrap().is_empty());
        assert!(tree.is_unlabeled(f1));
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [
                {"class": "rect", "x": 0.0},
                {"class": "rect", "x": 5.0}
            ]},
            {"num": 1, "unlabeled": true, "annotations": []},
            {"num": 2, "annotations": [{"class": "rect", "x": 20.0}]}
        ]));
        let last = frame(&mut tree, 2);
        assert!(interpolate(&mut tree, last, &InterpolateOpts::default()).is_err());
    }

    #[test]
    fn test_unmatched_slot_modes() {
        let _ = env_logger::builder().is_test(true).try_init();
        let frames = json!([
            {"num": 0, "annotations": [
                {"class": "rect", "x": 0.0},
                {"class": "point", "x": 5.0}
            ]},
            {"num": 1, "unlabeled": true, "annotations": []},
            {"num": 2, "annotations": [
                {"class": "rect", "x": 20.0},
                {"class": "circle", "x": 7.0}
            ]}
        ]);

        // Lenient mode fills what it can match
        let mut tree = tree_with_frames(frames.clone());
        let last = frame(&mut tree, 2);
        let written = interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();
        assert_eq!(written, 1);
        let f1 = frame(&mut tree, 1);
        assert_eq!(tree.annotation_children(f1).unwrap().len(), 1);

        // Strict mode aborts
        let mut tree = tree_with_frames(frames);
        let last = frame(&mut tree, 2);
        let opts = InterpolateOpts {
            unmatched: UnmatchedSlot::Fail,
            ..Default::default()
        };
        assert!(interpolate(&mut tree, last, &opts).is_err());
    }

    #[test]
    fn test_target_must_be_labeled() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [{"class": "rect", "x": 0.0}]},
            {"num": 1, "unlabeled": true, "annotations": []}
        ]));
        let last = frame(&mut tree, 1);
        assert!(interpolate(&mut tree, last, &InterpolateOpts::default()).is_err());
    }

    #[test]
    fn test_keyrow_row_is_not_a_labeled_boundary() {
        // Visible video attribute puts a KeyRow at row 0 of the child list;
        // the backward walk must not treat it as the labeled endpoint when
        // the run reaches the front
        let mut tree = AnnotationTree::with_raw_files(vec![json!({
            "class": "video",
            "filename": "clip.mp4",
            "fps": 25.0,
            "frames": [
                {"num": 0, "unlabeled": true, "annotations": [
                    {"class": "rect", "x": 1.0}
                ]},
                {"num": 1, "annotations": []}
            ]
        })]);
        let root = tree.root();
        let video = tree.child_at(root, 0).unwrap();
        let count = tree.row_count(video).unwrap();
        let last = tree.child_at(video, count - 1).unwrap();

        assert!(interpolate(&mut tree, last, &InterpolateOpts::default()).is_err());

        // The unlabeled frame keeps its annotations; nothing was written
        let frame0 = tree.child_at(video, count - 2).unwrap();
        assert_eq!(tree.annotation_children(frame0).unwrap().len(), 1);
        assert!(tree.is_unlabeled(frame0));
    }

    #[test]
    fn test_no_labeled_boundary_errors() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "unlabeled": true, "annotations": []},
            {"num": 1, "annotations": [{"class": "rect", "x": 0.0}]}
        ]));
        let last = frame(&mut tree, 1);
        assert!(interpolate(&mut tree, last, &InterpolateOpts::default()).is_err());
    }

    #[test]
    fn test_no_gap_is_a_noop() {
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [{"class": "rect", "x": 0.0}]},
            {"num": 1, "annotations": [{"class": "rect", "x": 10.0}]}
        ]));
        let last = frame(&mut tree, 1);
        let written = interpolate(&mut tree, last, &InterpolateOpts::default()).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_custom_overwrite_predicate() {
        // Predicate keyed on a review attribute instead of the flags
        let mut tree = tree_with_frames(json!([
            {"num": 0, "annotations": [{"class": "rect", "x": 0.0}]},
            {"num": 1, "stage": "draft", "annotations": []},
            {"num": 2, "annotations": [{"class": "rect", "x": 20.0}]}
        ]));
        let last = frame(&mut tree, 2);
        let opts = InterpolateOpts {
            should_overwrite: Some(Box::new(|tree, id| {
                tree.attrs(id)
                    .map(|a| a.get_str("stage") == Some("draft"))
                    .unwrap_or(false)
            })),
            ..Default::default()
        };
        let written = interpolate(&mut tree, last, &opts).unwrap();
        assert_eq!(written, 1);
    }
}
