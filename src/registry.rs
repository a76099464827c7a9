//! Annotation class registry.
//!
//! Maps a class tag ("rect", "point", ...) to a handle describing how that
//! class is drawn and which attribute prefix carries its geometry. Tools
//! register their own classes at startup; re-registering an existing tag is
//! an error unless replacement is requested explicitly.

use std::collections::HashMap;

use log::info;

use crate::error::ModelError;

/// RGBA color for class decoration in the view.
pub type Color = [u8; 4];

const DEFAULT_COLOR: Color = [255, 255, 0, 255];

/// Behavior of one annotation class.
pub trait ClassHandle {
    /// The class tag stored under the `class` attribute.
    fn tag(&self) -> &str;

    /// Attribute-name prefix for this class's geometry keys
    /// (e.g. "" for plain `x`/`y`, "bbox_" for `bbox_x`/`bbox_y`).
    fn geometry_prefix(&self) -> &str {
        ""
    }

    fn color(&self) -> Color {
        DEFAULT_COLOR
    }
}

pub type ClassFactory = Box<dyn Fn() -> Box<dyn ClassHandle>>;

/// Registry of annotation classes keyed by tag.
#[derive(Default)]
pub struct ClassRegistry {
    factories: HashMap<String, ClassFactory>,
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.factories.len())
            .finish()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in rect and point classes.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("rect", Box::new(|| Box::new(RectClass)), false)
            .expect("builtin tags are distinct");
        reg.register("point", Box::new(|| Box::new(PointClass)), false)
            .expect("builtin tags are distinct");
        reg
    }

    /// Register a class factory under its tag. Fails on a duplicate tag
    /// unless `replace` is set.
    pub fn register(
        &mut self,
        tag: &str,
        factory: ClassFactory,
        replace: bool,
    ) -> Result<(), ModelError> {
        if !replace && self.factories.contains_key(tag) {
            return Err(ModelError::DuplicateClass(tag.to_string()));
        }
        info!("registered annotation class '{}'", tag);
        self.factories.insert(tag.to_string(), factory);
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Instantiate a handle for a tag; None for unregistered tags.
    pub fn create(&self, tag: &str) -> Option<Box<dyn ClassHandle>> {
        self.factories.get(tag).map(|f| f())
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort();
        tags
    }
}

/// Axis-aligned bounding box stored as x/y/width/height.
pub struct RectClass;

impl ClassHandle for RectClass {
    fn tag(&self) -> &str {
        "rect"
    }
}

/// Single landmark stored as x/y.
pub struct PointClass;

impl ClassHandle for PointClass {
    fn tag(&self) -> &str {
        "point"
    }

    fn color(&self) -> Color {
        [0, 255, 255, 255]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BboxClass;

    impl ClassHandle for BboxClass {
        fn tag(&self) -> &str {
            "rect"
        }

        fn geometry_prefix(&self) -> &str {
            "bbox_"
        }
    }

    #[test]
    fn test_builtins_present() {
        let reg = ClassRegistry::with_builtins();
        assert_eq!(reg.tags(), ["point", "rect"]);
        let handle = reg.create("rect").unwrap();
        assert_eq!(handle.tag(), "rect");
        assert_eq!(handle.geometry_prefix(), "");
    }

    #[test]
    fn test_duplicate_rejected_without_replace() {
        let mut reg = ClassRegistry::with_builtins();
        let err = reg
            .register("rect", Box::new(|| Box::new(BboxClass)), false)
            .unwrap_err();
        assert_eq!(err, ModelError::DuplicateClass("rect".to_string()));
    }

    #[test]
    fn test_replace_overrides() {
        let mut reg = ClassRegistry::with_builtins();
        reg.register("rect", Box::new(|| Box::new(BboxClass)), true)
            .unwrap();
        let handle = reg.create("rect").unwrap();
        assert_eq!(handle.geometry_prefix(), "bbox_");
    }

    #[test]
    fn test_unknown_tag() {
        let reg = ClassRegistry::new();
        assert!(!reg.contains("rect"));
        assert!(reg.create("rect").is_none());
    }
}
