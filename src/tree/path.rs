//! Virtual paths and the codec mapping them onto the mirrored root.
//!
//! A virtual path is root-relative, `/`-separated, NFC-normalized, and never
//! contains `..` or characters that are unsafe across filesystems. The
//! synthetic root is `/`.

use crate::error::{ApiError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Characters rejected in any path handed to the mirror.
pub const DISALLOWED_CHARS: &[char] = &['*', '{', '}', '|', '<', '>', '"'];

/// Root-relative, slash-normalized path exposed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn root() -> Self {
        VirtualPath("/".to_string())
    }

    /// Parse and normalize a candidate path.
    ///
    /// Empty input, `.` and `/` all denote the root. Empty and `.` segments
    /// are dropped. Anything failing [`is_sane`] is rejected.
    pub fn parse(candidate: &str) -> Result<Self, ApiError> {
        if !is_sane(candidate) {
            return Err(ApiError::InvalidPath(candidate.to_string()));
        }
        let segments: Vec<String> = candidate
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .map(|s| s.nfc().collect())
            .collect();
        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(VirtualPath(format!("/{}", segments.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// The path with its last segment removed; `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(VirtualPath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Append a single segment. The segment is validated like any other input.
    pub fn join(&self, segment: &str) -> Result<VirtualPath, ApiError> {
        if segment.is_empty() || segment.contains(['/', '\\']) || segment == "." {
            return Err(ApiError::InvalidPath(segment.to_string()));
        }
        if !is_sane(segment) {
            return Err(ApiError::InvalidPath(segment.to_string()));
        }
        let segment: String = segment.nfc().collect();
        if self.is_root() {
            Ok(VirtualPath(format!("/{}", segment)))
        } else {
            Ok(VirtualPath(format!("{}/{}", self.0, segment)))
        }
    }

    /// True when `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &VirtualPath) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// True when `self` is `other` or lies below it.
    pub fn is_within(&self, other: &VirtualPath) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// This path followed by every ancestor up to and including the root.
    pub fn self_and_ancestors(&self) -> Vec<VirtualPath> {
        let mut out = vec![self.clone()];
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out
    }

    /// Substitute the `from` prefix with `to`. Returns `None` when `self`
    /// is not within `from`.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Option<VirtualPath> {
        if self == from {
            return Some(to.clone());
        }
        if !self.is_descendant_of(from) {
            return None;
        }
        let rest = if from.is_root() {
            &self.0[1..]
        } else {
            &self.0[from.0.len() + 1..]
        };
        if to.is_root() {
            Some(VirtualPath(format!("/{}", rest)))
        } else {
            Some(VirtualPath(format!("{}/{}", to.0, rest)))
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VirtualPath::parse(&value)
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.0
    }
}

/// Reject `..` segments and characters unsafe across filesystems.
pub fn is_sane(candidate: &str) -> bool {
    if candidate.contains(DISALLOWED_CHARS) || candidate.contains('\0') {
        return false;
    }
    !candidate.split(['/', '\\']).any(|segment| segment == "..")
}

/// Converts between virtual paths and absolute paths under a fixed root.
#[derive(Debug, Clone)]
pub struct PathCodec {
    root: PathBuf,
}

impl PathCodec {
    /// Create a codec for `root`. The root is canonicalized once so that
    /// watcher-reported paths compare equal to walk results.
    pub fn new(root: &Path) -> Result<Self, ApiError> {
        let root = dunce::canonicalize(root)
            .map_err(|e| ApiError::from(StorageError::from_io(e, root)))?;
        if !root.is_dir() {
            return Err(ApiError::ConfigError(format!(
                "Mirror root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an absolute path under the root to its virtual path.
    pub fn to_virtual(&self, absolute: &Path) -> Result<VirtualPath, ApiError> {
        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| ApiError::InvalidPath(absolute.display().to_string()))?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| ApiError::InvalidPath(absolute.display().to_string()))?;
                    segments.push(name);
                }
                Component::CurDir => {}
                _ => return Err(ApiError::InvalidPath(absolute.display().to_string())),
            }
        }
        VirtualPath::parse(&segments.join("/"))
    }

    /// Map a virtual path to its absolute location under the root.
    pub fn to_absolute(&self, path: &VirtualPath) -> PathBuf {
        let mut absolute = self.root.clone();
        for segment in path.as_str().split('/').filter(|s| !s.is_empty()) {
            absolute.push(segment);
        }
        absolute
    }

    /// Validate a raw observer-supplied path and resolve it in one step.
    pub fn resolve(&self, candidate: &str) -> Result<(VirtualPath, PathBuf), ApiError> {
        let path = VirtualPath::parse(candidate)?;
        let absolute = self.to_absolute(&path);
        Ok((path, absolute))
    }
}
