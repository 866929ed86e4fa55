//! Bottom-up aggregate size computation.

use super::cache::TreeCache;
use super::path::VirtualPath;
use crate::types::DirtySet;
use tracing::{debug, warn};

/// Recomputes every directory's aggregate size.
pub struct SizeAggregator;

impl SizeAggregator {
    /// Recompute sizes over the whole cache.
    ///
    /// `affected` is informational only: a change below any directory moves
    /// the size of every ancestor, including ones the triggering change never
    /// touched, so the full map is always processed. Returns the number of
    /// directories visited.
    pub fn recompute(cache: &mut TreeCache, affected: &DirtySet) -> usize {
        let mut keys: Vec<VirtualPath> = cache.nodes.keys().cloned().collect();
        // Deepest first: a child's total is final before it is added to its parent.
        keys.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));

        for node in cache.nodes.values_mut() {
            node.size = node.direct_size();
        }

        for key in &keys {
            let Some(parent) = key.parent() else { continue };
            let Some(size) = cache.nodes.get(key).map(|n| n.size) else {
                continue;
            };
            match cache.nodes.get_mut(&parent) {
                Some(parent_node) => parent_node.size += size,
                None => warn!(dir = %key, "Cached directory has no cached parent"),
            }
        }

        debug!(
            directories = keys.len(),
            affected = affected.len(),
            "Recomputed aggregate sizes"
        );
        keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::FileEntry;
    use chrono::Utc;
    use proptest::prelude::*;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    fn assert_size_invariant(cache: &TreeCache) {
        for key in cache.keys() {
            let node = cache.directory(key).unwrap();
            let children: u64 = cache.children_of(key).map(|(_, c)| c.size).sum();
            assert_eq!(node.size, node.direct_size() + children, "size mismatch at {}", key);
        }
    }

    #[test]
    fn test_sizes_propagate_to_every_ancestor() {
        let mut cache = TreeCache::new();
        let now = Utc::now();
        cache.add_directory(&vp("/a"), now).unwrap();
        cache.add_directory(&vp("/a/b"), now).unwrap();
        cache.add_directory(&vp("/a/b/c"), now).unwrap();
        cache.set_file(&vp("/a/b/c"), "f", FileEntry::new(10, now)).unwrap();
        cache.set_file(&vp("/a"), "g", FileEntry::new(1, now)).unwrap();

        SizeAggregator::recompute(&mut cache, &DirtySet::new());
        assert_eq!(cache.directory(&vp("/a/b/c")).unwrap().size, 10);
        assert_eq!(cache.directory(&vp("/a/b")).unwrap().size, 10);
        assert_eq!(cache.directory(&vp("/a")).unwrap().size, 11);
        assert_eq!(cache.directory(&VirtualPath::root()).unwrap().size, 11);

        cache.remove_file(&vp("/a/b/c"), "f");
        SizeAggregator::recompute(&mut cache, &[vp("/a/b/c")].into_iter().collect());
        assert_eq!(cache.directory(&VirtualPath::root()).unwrap().size, 1);
        assert_size_invariant(&cache);
    }

    proptest! {
        #[test]
        fn prop_size_invariant_holds(
            layout in prop::collection::vec((0usize..4, 0usize..3, 0u64..10_000), 0..40)
        ) {
            let mut cache = TreeCache::new();
            let now = Utc::now();
            for (i, (depth, branch, size)) in layout.iter().enumerate() {
                let mut dir = VirtualPath::root();
                for level in 0..*depth {
                    dir = dir.join(&format!("d{}_{}", level, branch)).unwrap();
                    if !cache.contains_dir(&dir) {
                        cache.add_directory(&dir, now).unwrap();
                    }
                }
                cache.set_file(&dir, &format!("f{}", i), FileEntry::new(*size, now)).unwrap();
            }

            SizeAggregator::recompute(&mut cache, &DirtySet::new());

            let total: u64 = layout.iter().map(|(_, _, s)| *s).sum();
            prop_assert_eq!(cache.directory(&VirtualPath::root()).unwrap().size, total);
            for key in cache.keys() {
                let node = cache.directory(key).unwrap();
                let children: u64 = cache.children_of(key).map(|(_, c)| c.size).sum();
                prop_assert_eq!(node.size, node.direct_size() + children);
            }
        }
    }
}
