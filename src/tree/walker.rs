//! Filesystem walks that feed the tree cache.
//!
//! Walks are blocking and run off the control loop; the result is a plain
//! value that the loop applies to the cache in one step.

use super::node::{modified_time, DirectoryNode, FileEntry};
use super::path::{PathCodec, VirtualPath};
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Walker configuration
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    pub follow_symlinks: bool,
    pub ignore_patterns: Vec<String>,
    pub max_depth: Option<usize>,
}

/// Glob-ish ignore matching over `/`-normalized paths.
///
/// `**` matches across separators, `*` within one segment. A pattern ending
/// in `/**` also matches the directory itself. Patterns without wildcards
/// match as substrings.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.replace('\\', "/")).collect(),
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.patterns
            .iter()
            .any(|pattern| matches_pattern(&normalized, pattern))
    }
}

fn matches_pattern(path: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return path.contains(pattern);
    }
    if glob(pattern.as_bytes(), path.as_bytes()) {
        return true;
    }
    match pattern.strip_suffix("/**") {
        Some(dir_pattern) => glob(dir_pattern.as_bytes(), path.as_bytes()),
        None => false,
    }
}

fn glob(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') if pattern.get(1) == Some(&b'*') => {
            let rest = &pattern[2..];
            (0..=text.len()).any(|i| glob(rest, &text[i..]))
        }
        Some(b'*') => {
            let rest = &pattern[1..];
            for i in 0..=text.len() {
                if glob(rest, &text[i..]) {
                    return true;
                }
                if i < text.len() && text[i] == b'/' {
                    break;
                }
            }
            false
        }
        Some(&c) => text.first() == Some(&c) && glob(&pattern[1..], &text[1..]),
    }
}

/// Freshly observed state of one subtree.
#[derive(Debug, Clone)]
pub struct SubtreeScan {
    pub root: VirtualPath,
    pub directories: BTreeMap<VirtualPath, DirectoryNode>,
}

/// Direct files of one directory, without descending.
#[derive(Debug, Clone)]
pub struct FileScan {
    pub directory: VirtualPath,
    pub files: BTreeMap<String, FileEntry>,
    pub modified_at: DateTime<Utc>,
}

/// Blocking filesystem walker
#[derive(Debug, Clone)]
pub struct Walker {
    config: WalkerConfig,
    ignore: IgnoreRules,
}

impl Walker {
    pub fn new(config: WalkerConfig) -> Self {
        let ignore = IgnoreRules::new(&config.ignore_patterns);
        Self { config, ignore }
    }

    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.ignore
    }

    /// Walk `dir` and everything below it.
    ///
    /// Entries that vanish mid-walk are omitted. Failing to read `dir` itself
    /// is returned as an error so the caller can keep its last-known state.
    pub fn scan_subtree(&self, codec: &PathCodec, dir: &VirtualPath) -> Result<SubtreeScan, StorageError> {
        let absolute = codec.to_absolute(dir);
        let metadata = std::fs::metadata(&absolute).map_err(|e| StorageError::from_io(e, &absolute))?;
        if !metadata.is_dir() {
            return Err(StorageError::NotFound(absolute.display().to_string()));
        }

        let mut directories: BTreeMap<VirtualPath, DirectoryNode> = BTreeMap::new();
        directories.insert(dir.clone(), DirectoryNode::empty(modified_time(&metadata)));

        let mut walk = WalkDir::new(&absolute)
            .follow_links(self.config.follow_symlinks)
            .min_depth(1);
        if let Some(depth) = self.config.max_depth {
            walk = walk.max_depth(depth);
        }

        let ignore = &self.ignore;
        let entries = walk
            .into_iter()
            .filter_entry(|entry| !ignore.is_ignored(entry.path()));

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let gone = e
                        .io_error()
                        .map(|io| io.kind() == io::ErrorKind::NotFound)
                        .unwrap_or(false);
                    if gone {
                        debug!(error = %e, "Entry vanished during walk");
                    } else {
                        warn!(error = %e, "Skipping unreadable entry during walk");
                    }
                    continue;
                }
            };

            let virtual_path = match codec.to_virtual(entry.path()) {
                Ok(p) => p,
                Err(e) => {
                    debug!(path = ?entry.path(), error = %e, "Skipping unrepresentable entry");
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %virtual_path, error = %e, "Entry vanished before stat");
                    continue;
                }
            };

            if metadata.is_dir() {
                directories.insert(virtual_path, DirectoryNode::empty(modified_time(&metadata)));
                continue;
            }

            let (Some(parent), Some(name)) = (virtual_path.parent(), virtual_path.name()) else {
                continue;
            };
            // Parents are yielded before their contents; a missing parent was filtered out.
            if let Some(node) = directories.get_mut(&parent) {
                node.files
                    .insert(name.to_string(), FileEntry::from_metadata(&metadata));
            }
        }

        Ok(SubtreeScan {
            root: dir.clone(),
            directories,
        })
    }

    /// Re-read the direct files of `dir` without touching subdirectories.
    pub fn scan_files(&self, codec: &PathCodec, dir: &VirtualPath) -> Result<FileScan, StorageError> {
        let absolute = codec.to_absolute(dir);
        let metadata = std::fs::metadata(&absolute).map_err(|e| StorageError::from_io(e, &absolute))?;
        let read_dir = std::fs::read_dir(&absolute).map_err(|e| StorageError::from_io(e, &absolute))?;

        let mut files = BTreeMap::new();
        for entry in read_dir {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if self.ignore.is_ignored(&path) {
                continue;
            }
            let stat = if self.config.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            let metadata = match stat {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = ?path, error = %e, "Entry vanished before stat");
                    continue;
                }
            };
            if metadata.is_dir() {
                continue;
            }
            let Ok(virtual_path) = codec.to_virtual(&path) else {
                continue;
            };
            if let Some(name) = virtual_path.name() {
                files.insert(name.to_string(), FileEntry::from_metadata(&metadata));
            }
        }

        Ok(FileScan {
            directory: dir.clone(),
            files,
            modified_at: modified_time(&metadata),
        })
    }
}
