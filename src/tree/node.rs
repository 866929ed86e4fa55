//! Cached filesystem node types and immutable listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

use super::path::VirtualPath;

/// A single file inside a cached directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl FileEntry {
    pub fn new(size: u64, modified_at: DateTime<Utc>) -> Self {
        Self { size, modified_at }
    }

    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified_at: modified_time(metadata),
        }
    }
}

/// Directory node representation
///
/// `files` holds direct children only; subdirectories are separate keys in
/// the cache. `size` is the aggregate over the whole subtree and is owned by
/// the size aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    pub files: BTreeMap<String, FileEntry>,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl DirectoryNode {
    pub fn empty(modified_at: DateTime<Utc>) -> Self {
        Self {
            files: BTreeMap::new(),
            size: 0,
            modified_at,
        }
    }

    /// Sum of direct file sizes.
    pub fn direct_size(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}

/// Entry kind as sent to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

/// Immutable snapshot of a directory's direct children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub folder: VirtualPath,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub entries: BTreeMap<String, ListingEntry>,
}

pub(crate) fn modified_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}
