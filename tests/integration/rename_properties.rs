//! Directory renames preserve the moved subtree exactly.

use chrono::Utc;
use dirmirror::tree::{FileEntry, TreeCache, VirtualPath};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn vp(s: &str) -> VirtualPath {
    VirtualPath::parse(s).unwrap()
}

/// Relative directory paths (as segment lists) under the moved directory.
fn subtree() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec("[a-c]{1,2}", 1..4), 0..12)
}

fn build(dirs: &[Vec<String>]) -> TreeCache {
    let now = Utc::now();
    let mut cache = TreeCache::new();
    cache.add_directory(&vp("/src"), now).unwrap();
    cache.add_directory(&vp("/dst"), now).unwrap();
    for segments in dirs {
        let mut current = vp("/src");
        for segment in segments {
            current = current.join(segment).unwrap();
            cache.add_directory(&current, now).unwrap();
        }
        let size = segments.len() as u64;
        cache.set_file(&current, "f.bin", FileEntry::new(size, now)).unwrap();
    }
    cache
}

fn relative_view(cache: &TreeCache, base: &VirtualPath) -> BTreeMap<String, Vec<(String, u64)>> {
    cache
        .keys()
        .filter(|k| k.is_within(base))
        .map(|k| {
            let rel = k.rebase(base, &VirtualPath::root()).unwrap().to_string();
            let files = cache
                .directory(k)
                .unwrap()
                .files
                .iter()
                .map(|(name, f)| (name.clone(), f.size))
                .collect();
            (rel, files)
        })
        .collect()
}

proptest! {
    #[test]
    fn rename_moves_every_key_and_keeps_contents(dirs in subtree()) {
        let mut cache = build(&dirs);
        let before = relative_view(&cache, &vp("/src"));
        let total = cache.len();

        let moved = cache.rename_directory(&vp("/src"), &vp("/dst/moved")).unwrap();

        prop_assert_eq!(moved, before.len());
        prop_assert_eq!(cache.len(), total);
        prop_assert!(cache.keys().all(|k| !k.is_within(&vp("/src"))));
        prop_assert_eq!(relative_view(&cache, &vp("/dst/moved")), before);
    }
}
