//! Multi-frame labeling operations built on top of the tree.

pub mod copy_forward;
pub mod interpolate;

pub use copy_forward::{copy_forward, CopyForwardOpts, OverlapMode};
pub use interpolate::{interpolate, InterpolateOpts, UnmatchedSlot};
