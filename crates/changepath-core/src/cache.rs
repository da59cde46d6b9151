//! Per-invocation set of already dispatched paths.

use indexmap::IndexSet;

/// Insertion-ordered, append-only set of paths seen by one step invocation.
#[derive(Debug, Default)]
pub struct FileCache {
    paths: IndexSet<String>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path`; returns `false` if it was already present.
    pub fn insert(&mut self, path: &str) -> bool {
        if self.paths.contains(path) {
            return false;
        }
        self.paths.insert(path.to_string())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_once() {
        let mut cache = FileCache::new();
        assert!(cache.insert("a.txt"));
        assert!(!cache.insert("a.txt"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_only_first_sighting_inserts() {
        let mut cache = FileCache::new();
        let inserted: Vec<_> = ["c", "a", "c", "b", "a"]
            .into_iter()
            .map(|p| cache.insert(p))
            .collect();
        assert_eq!(inserted, vec![true, true, false, true, false]);
        assert_eq!(cache.len(), 3);
    }
}
