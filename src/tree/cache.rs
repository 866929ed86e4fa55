//! In-memory mirror of the watched subtree.
//!
//! Directories live in one flat map keyed by virtual path. Subtree operations
//! (removal, rename, child enumeration) are prefix scans over that map and
//! cost O(n) in the number of cached directories.

use super::node::{DirectoryNode, EntryKind, FileEntry, Listing, ListingEntry};
use super::path::{PathCodec, VirtualPath};
use super::walker::{FileScan, SubtreeScan, Walker};
use crate::error::{ApiError, StorageError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Result of applying a rebuild to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The subtree was replaced with `directories` fresh entries.
    Replaced { directories: usize },
    /// The directory no longer exists; `removed` stale entries were dropped.
    Vanished { removed: usize },
    /// The walk failed; the cached subtree was left untouched.
    Kept,
}

/// Flat path → directory map
#[derive(Debug, Clone)]
pub struct TreeCache {
    pub(crate) nodes: HashMap<VirtualPath, DirectoryNode>,
}

impl Default for TreeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeCache {
    /// A cache holding only an empty root.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(VirtualPath::root(), DirectoryNode::empty(Utc::now()));
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_dir(&self, dir: &VirtualPath) -> bool {
        self.nodes.contains_key(dir)
    }

    pub fn directory(&self, dir: &VirtualPath) -> Option<&DirectoryNode> {
        self.nodes.get(dir)
    }

    pub fn file(&self, dir: &VirtualPath, name: &str) -> Option<&FileEntry> {
        self.nodes.get(dir).and_then(|node| node.files.get(name))
    }

    /// Whether `path` names a cached file or directory.
    pub fn exists(&self, path: &VirtualPath) -> bool {
        if self.nodes.contains_key(path) {
            return true;
        }
        match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => self.file(&parent, name).is_some(),
            _ => false,
        }
    }

    /// Every cached directory key.
    pub fn keys(&self) -> impl Iterator<Item = &VirtualPath> {
        self.nodes.keys()
    }

    /// Nearest cached directory at or above `path`.
    pub fn nearest_cached(&self, path: &VirtualPath) -> VirtualPath {
        path.self_and_ancestors()
            .into_iter()
            .find(|p| self.nodes.contains_key(p))
            .unwrap_or_else(VirtualPath::root)
    }

    /// Walk `dir` on disk and replace its cached subtree. Blocking.
    pub fn rebuild_subtree(&mut self, codec: &PathCodec, walker: &Walker, dir: &VirtualPath) -> RebuildOutcome {
        let scan = walker.scan_subtree(codec, dir);
        self.apply_subtree_scan(dir, scan)
    }

    /// Apply the result of a subtree walk.
    ///
    /// Not-found drops the stale subtree; any other failure keeps the
    /// last-known-good state.
    pub fn apply_subtree_scan(
        &mut self,
        dir: &VirtualPath,
        scan: Result<SubtreeScan, StorageError>,
    ) -> RebuildOutcome {
        match scan {
            Ok(scan) => {
                self.replace_subtree(scan);
                let directories = self.nodes.keys().filter(|k| k.is_within(dir)).count();
                RebuildOutcome::Replaced { directories }
            }
            Err(e) if e.is_not_found() => {
                debug!(dir = %dir, "Directory vanished; dropping cached subtree");
                let removed = if dir.is_root() {
                    self.clear_to_root()
                } else {
                    self.remove_directory(dir)
                };
                RebuildOutcome::Vanished { removed }
            }
            Err(e) => {
                warn!(dir = %dir, error = %e, "Rebuild failed; keeping last known state");
                RebuildOutcome::Kept
            }
        }
    }

    /// Replace every key at or below `scan.root` with the scanned entries.
    pub fn replace_subtree(&mut self, scan: SubtreeScan) {
        let root = scan.root;
        self.nodes.retain(|key, _| !key.is_within(&root));
        self.nodes.extend(scan.directories);
    }

    /// Replace the direct files of a directory, keeping its subdirectories.
    pub fn apply_file_scan(&mut self, scan: FileScan) -> Result<(), ApiError> {
        let node = self
            .nodes
            .get_mut(&scan.directory)
            .ok_or_else(|| ApiError::not_found(scan.directory.to_string()))?;
        node.files = scan.files;
        node.modified_at = scan.modified_at;
        Ok(())
    }

    pub fn set_file(&mut self, dir: &VirtualPath, name: &str, entry: FileEntry) -> Result<(), ApiError> {
        let node = self
            .nodes
            .get_mut(dir)
            .ok_or_else(|| ApiError::not_found(dir.to_string()))?;
        node.files.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn remove_file(&mut self, dir: &VirtualPath, name: &str) -> Option<FileEntry> {
        self.nodes.get_mut(dir).and_then(|node| node.files.remove(name))
    }

    /// Insert an empty directory. Its parent must already be cached.
    pub fn add_directory(&mut self, dir: &VirtualPath, modified_at: DateTime<Utc>) -> Result<(), ApiError> {
        let parent = dir
            .parent()
            .ok_or_else(|| ApiError::InvalidPath(dir.to_string()))?;
        if !self.nodes.contains_key(&parent) {
            return Err(ApiError::not_found(parent.to_string()));
        }
        self.nodes
            .entry(dir.clone())
            .or_insert_with(|| DirectoryNode::empty(modified_at));
        Ok(())
    }

    /// Remove `dir` and every key below it. Returns the number removed.
    pub fn remove_directory(&mut self, dir: &VirtualPath) -> usize {
        if dir.is_root() {
            return 0;
        }
        let before = self.nodes.len();
        self.nodes.retain(|key, _| !key.is_within(dir));
        before - self.nodes.len()
    }

    /// Rewrite `old` and every `old/...` key to live under `new`.
    ///
    /// Fails without modifying anything when `old` is absent, `new` already
    /// exists, or `new`'s parent is not cached.
    pub fn rename_directory(&mut self, old: &VirtualPath, new: &VirtualPath) -> Result<usize, ApiError> {
        if old.is_root() || new.is_root() || new.is_within(old) {
            return Err(ApiError::InvalidPath(format!("{} -> {}", old, new)));
        }
        if !self.nodes.contains_key(old) {
            return Err(ApiError::not_found(old.to_string()));
        }
        if self.exists(new) {
            return Err(StorageError::AlreadyExists(new.to_string()).into());
        }
        match new.parent() {
            Some(parent) if self.nodes.contains_key(&parent) => {}
            _ => return Err(ApiError::not_found(format!("parent of {}", new))),
        }

        let moved: Vec<VirtualPath> = self.nodes.keys().filter(|k| k.is_within(old)).cloned().collect();
        for key in &moved {
            if let (Some(node), Some(target)) = (self.nodes.remove(key), key.rebase(old, new)) {
                self.nodes.insert(target, node);
            }
        }
        Ok(moved.len())
    }

    /// Immutable view of `dir`'s direct children.
    pub fn snapshot(&self, dir: &VirtualPath) -> Result<Listing, ApiError> {
        let node = self
            .nodes
            .get(dir)
            .ok_or_else(|| ApiError::not_found(dir.to_string()))?;

        let mut entries: BTreeMap<String, ListingEntry> = node
            .files
            .iter()
            .map(|(name, file)| {
                (
                    name.clone(),
                    ListingEntry {
                        kind: EntryKind::File,
                        modified_at: file.modified_at,
                        size: file.size,
                    },
                )
            })
            .collect();

        for (key, child) in self.children_of(dir) {
            if let Some(name) = key.name() {
                entries.insert(
                    name.to_string(),
                    ListingEntry {
                        kind: EntryKind::Dir,
                        modified_at: child.modified_at,
                        size: child.size,
                    },
                );
            }
        }

        Ok(Listing {
            folder: dir.clone(),
            size: node.size,
            modified_at: node.modified_at,
            entries,
        })
    }

    /// Direct subdirectories of `dir` (prefix scan).
    pub fn children_of<'a>(
        &'a self,
        dir: &'a VirtualPath,
    ) -> impl Iterator<Item = (&'a VirtualPath, &'a DirectoryNode)> + 'a {
        self.nodes
            .iter()
            .filter(move |(key, _)| key.parent().as_ref() == Some(dir))
    }

    /// Every (relative path, size, modified) triple for files under `dir`.
    pub fn subtree_files(&self, dir: &VirtualPath) -> Vec<(String, u64, DateTime<Utc>)> {
        let mut out = Vec::new();
        for (key, node) in self.nodes.iter().filter(|(k, _)| k.is_within(dir)) {
            let relative = key.rebase(dir, &VirtualPath::root()).unwrap_or_else(VirtualPath::root);
            for (name, file) in &node.files {
                let path = if relative.is_root() {
                    format!("/{}", name)
                } else {
                    format!("{}/{}", relative, name)
                };
                out.push((path, file.size, file.modified_at));
            }
        }
        out.sort();
        out
    }

    fn clear_to_root(&mut self) -> usize {
        let before = self.nodes.len();
        self.nodes.clear();
        self.nodes.insert(VirtualPath::root(), DirectoryNode::empty(Utc::now()));
        before - 1
    }
}
