//! Core identifiers and value types shared across the mirror.

use crate::tree::VirtualPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// ObserverId: one connected remote observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(pub Uuid);

impl ObserverId {
    pub fn new() -> Self {
        ObserverId(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// ViewId: client-chosen identifier of one view within a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub String);

impl From<&str> for ViewId {
    fn from(value: &str) -> Self {
        ViewId(value.to_string())
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// (observer, view) pair identifying a subscription.
pub type ViewKey = (ObserverId, ViewId);

/// What kind of change made a directory dirty.
///
/// Ordered so that merging two marks keeps the more expensive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// File contents changed in place; a shallow refresh suffices.
    Content,
    /// Entries were created, deleted or renamed; the subtree is rebuilt.
    Structural,
}

/// Deduplicated set of directories whose contents changed since the last flush.
///
/// Ancestors and descendants are both kept: fan-out walks upward from every
/// member, so dropping `/a/b` because `/a` is present would miss views on `/a/b`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    dirs: BTreeSet<VirtualPath>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the path was already present.
    pub fn insert(&mut self, dir: VirtualPath) -> bool {
        self.dirs.insert(dir)
    }

    pub fn contains(&self, dir: &VirtualPath) -> bool {
        self.dirs.contains(dir)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualPath> {
        self.dirs.iter()
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

impl FromIterator<VirtualPath> for DirtySet {
    fn from_iter<T: IntoIterator<Item = VirtualPath>>(iter: T) -> Self {
        Self {
            dirs: iter.into_iter().collect(),
        }
    }
}
