//! Exact-content deduplication across the whole store.
//!
//! First occurrence in traversal order wins; every later image with the
//! same content hash is rejected. Traversal order is the raw store's
//! deterministic order (record id, then image position), so re-runs always
//! keep the same copy.

use std::collections::HashSet;

/// Tracks content hashes seen so far in one cleaning pass.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashSet<String>,
}

impl DedupIndex {
    /// Fresh index with nothing seen.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hash; true when it was new (the image is the keeper).
    pub fn insert(&mut self, hash: &str) -> bool {
        self.seen.insert(hash.to_string())
    }

    /// Hashes registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when no hash has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_wins() {
        let mut index = DedupIndex::new();
        assert!(index.insert("abc"));
        assert!(!index.insert("abc"));
        assert!(index.insert("def"));
        assert_eq!(index.len(), 2);
    }
}
