//! Bounded LRU cache for decoded source media.
//!
//! The tree stores only attribute data; pixel payloads decoded for display
//! are cached here, keyed by filename, with an explicit capacity so a long
//! annotation session cannot grow without bound. Eviction is plain LRU.

use std::num::NonZeroUsize;

use log::debug;
use lru::LruCache;

/// Keyed LRU cache with hit/miss accounting.
pub struct SourceCache<T> {
    cache: LruCache<String, T>,
    hits: u64,
    misses: u64,
}

impl<T> std::fmt::Debug for SourceCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache")
            .field("len", &self.cache.len())
            .field("cap", &self.cache.cap().get())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl<T> SourceCache<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<&T> {
        match self.cache.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        // push also returns the old entry on a same-key update
        if let Some((evicted, _)) = self.cache.push(key.clone(), value) {
            if evicted != key {
                debug!("evicted cached source '{}'", evicted);
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(cap: usize) -> SourceCache<u32> {
        SourceCache::new(NonZeroUsize::new(cap).unwrap())
    }

    #[test]
    fn test_insert_get() {
        let mut c = cache(4);
        c.insert("a.jpg", 1);
        assert_eq!(c.get("a.jpg"), Some(&1));
        assert_eq!(c.get("b.jpg"), None);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut c = cache(2);
        c.insert("a.jpg", 1);
        c.insert("b.jpg", 2);
        // Touch a so b becomes the eviction candidate
        c.get("a.jpg");
        c.insert("c.jpg", 3);

        assert!(c.contains("a.jpg"));
        assert!(!c.contains("b.jpg"));
        assert!(c.contains("c.jpg"));
    }

    #[test]
    fn test_same_key_update_is_not_an_eviction() {
        let mut c = cache(2);
        c.insert("a.jpg", 1);
        c.insert("b.jpg", 2);
        c.insert("a.jpg", 3);

        assert_eq!(c.len(), 2);
        assert!(c.contains("b.jpg"));
        assert_eq!(c.get("a.jpg"), Some(&3));
    }

    #[test]
    fn test_hit_rate() {
        let mut c = cache(2);
        assert_eq!(c.hit_rate(), 0.0);
        c.insert("a.jpg", 1);
        c.get("a.jpg");
        c.get("missing.jpg");
        assert!((c.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
