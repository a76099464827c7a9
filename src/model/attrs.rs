//! Ordered attribute storage shared across node types.
//!
//! Used by File, Frame, Annotation and Root nodes. Keys preserve insertion
//! order (round-trip guarantee), values are flat scalars.
//!
//! Two contract points of the store:
//! - Every store carries a hidden sentinel empty key, guarding against
//!   storage engines that collapse empty mappings on save. `IndexMap` does
//!   not, so the sentinel is structurally unnecessary here, but it is part of
//!   the store's documented contract and is kept (and stripped on export).
//! - A per-store hidden-key set (`class`, `unlabeled`, `unconfirmed`, the
//!   sentinel, plus caller-supplied keys such as `filename` on file nodes).
//!   Hidden keys never surface as KeyRow children in the tree view.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::keys::{K_CLASS, K_SENTINEL, K_UNCONFIRMED, K_UNLABELED};
use super::value::Value;

/// Attribute container: string key → scalar value, insertion-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attrs {
    map: IndexMap<String, Value>,
    #[serde(default)]
    hidden: HashSet<String>,
}

impl Default for Attrs {
    fn default() -> Self {
        Self::new()
    }
}

impl Attrs {
    pub fn new() -> Self {
        let mut map = IndexMap::new();
        map.insert(K_SENTINEL.to_string(), Value::Str(String::new()));

        let mut hidden = HashSet::new();
        hidden.insert(K_SENTINEL.to_string());
        hidden.insert(K_CLASS.to_string());
        hidden.insert(K_UNLABELED.to_string());
        hidden.insert(K_UNCONFIRMED.to_string());

        Self { map, hidden }
    }

    /// Store with additional hidden keys beyond the built-in set.
    pub fn with_hidden<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attrs = Self::new();
        for key in extra {
            attrs.hidden.insert(key.into());
        }
        attrs
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(|v| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.map.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        // shift_remove keeps the remaining insertion order intact
        self.map.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn hide(&mut self, key: impl Into<String>) {
        self.hidden.insert(key.into());
    }

    pub fn is_hidden(&self, key: &str) -> bool {
        self.hidden.contains(key)
    }

    /// Iterate all attributes in insertion order, sentinel included.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }

    /// Keys that should surface as KeyRow children, in insertion order.
    pub fn visible_keys(&self) -> Vec<String> {
        self.map
            .keys()
            .filter(|k| !self.hidden.contains(*k))
            .cloned()
            .collect()
    }

    /// Number of stored attributes, sentinel excluded.
    pub fn len(&self) -> usize {
        self.map.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export as a JSON object, sentinel stripped, hidden keys included
    /// (class/filename/flags are part of the egress record).
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (k, v) in &self.map {
            if k == K_SENTINEL {
                continue;
            }
            obj.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(obj)
    }
}
