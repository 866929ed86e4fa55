//! Mutation gateway
//!
//! Applies observer-issued intents. Every intent runs the same sequence:
//! validate paths, open the suppression window, perform the filesystem
//! operation, patch the cache directly, and mark the touched directories
//! dirty. A failure at any step before the cache patch leaves the cache
//! untouched.

mod naming;

pub use naming::unique_name;

use crate::collaborators::Persister;
use crate::engine::MirrorState;
use crate::error::{ApiError, StorageError};
use crate::protocol::{ClientMessage, ClipboardMode};
use crate::tree::node::modified_time;
use crate::tree::{FileEntry, PathCodec, VirtualPath, Walker};
use crate::types::ChangeKind;
use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Observer-issued mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    CreateFile { path: String },
    CreateFolder { path: String },
    Delete { path: String },
    /// Move `src` into the folder `dst_dir`, keeping its name.
    Move { src: String, dst_dir: String },
    /// Copy `src` into the folder `dst_dir`, keeping its name.
    Copy { src: String, dst_dir: String },
    /// Move `src` to the full path `dst`.
    Rename { src: String, dst: String },
    Write { path: String, contents: Vec<u8> },
}

impl Intent {
    /// The mutation carried by a client message, if it carries one.
    pub fn from_message(message: ClientMessage) -> Option<Intent> {
        match message {
            ClientMessage::CreateFolder { path } => Some(Intent::CreateFolder { path }),
            ClientMessage::CreateFile { path } => Some(Intent::CreateFile { path }),
            ClientMessage::DeleteFile { path } => Some(Intent::Delete { path }),
            ClientMessage::Clipboard { src, dst, mode } => Some(match mode {
                ClipboardMode::Copy => Intent::Copy { src, dst_dir: dst },
                ClipboardMode::Cut => Intent::Move { src, dst_dir: dst },
            }),
            ClientMessage::Rename { src, dst } => Some(Intent::Rename { src, dst }),
            ClientMessage::SaveFile { to, value, .. } => Some(Intent::Write {
                path: to,
                contents: value.into_bytes(),
            }),
            ClientMessage::RequestUpdate { .. }
            | ClientMessage::DestroyView { .. }
            | ClientMessage::SetUpdateInterval { .. } => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Intent::CreateFile { .. } => "create_file",
            Intent::CreateFolder { .. } => "create_folder",
            Intent::Delete { .. } => "delete",
            Intent::Move { .. } => "move",
            Intent::Copy { .. } => "copy",
            Intent::Rename { .. } => "rename",
            Intent::Write { .. } => "write",
        }
    }
}

/// Validates and performs observer mutations
pub struct MutationGateway {
    codec: Arc<PathCodec>,
    walker: Walker,
    persister: Arc<dyn Persister>,
}

impl MutationGateway {
    pub fn new(codec: Arc<PathCodec>, walker: Walker, persister: Arc<dyn Persister>) -> Self {
        Self {
            codec,
            walker,
            persister,
        }
    }

    /// Apply one intent. Returns the path of the resulting entry.
    pub async fn apply(
        &self,
        state: &mut MirrorState,
        intent: Intent,
        now: Instant,
    ) -> Result<VirtualPath, ApiError> {
        let kind = intent.name();
        let result = match intent {
            Intent::CreateFile { path } => self.create_file(state, &path, now).await,
            Intent::CreateFolder { path } => self.create_folder(state, &path, now).await,
            Intent::Delete { path } => self.delete(state, &path, now).await,
            Intent::Move { src, dst_dir } => {
                let (src, dst_dir) = (self.parse(&src)?, self.parse(&dst_dir)?);
                let dst = dst_dir.join(entry_name(&src)?)?;
                self.move_entry(state, src, dst, now).await
            }
            Intent::Rename { src, dst } => {
                let (src, dst) = (self.parse(&src)?, self.parse(&dst)?);
                self.move_entry(state, src, dst, now).await
            }
            Intent::Copy { src, dst_dir } => self.copy(state, &src, &dst_dir, now).await,
            Intent::Write { path, contents } => self.write(state, &path, &contents, now).await,
        };
        match &result {
            Ok(path) => info!(intent = kind, path = %path, "Applied mutation"),
            Err(e) => warn!(intent = kind, error = %e, "Mutation rejected"),
        }
        result
    }

    async fn create_file(&self, state: &mut MirrorState, raw: &str, now: Instant) -> Result<VirtualPath, ApiError> {
        let path = self.parse(raw)?;
        let (parent, name) = split(&path)?;
        self.require_cached_dir(state, &parent, now).await?;
        let absolute = self.codec.to_absolute(&path);

        state.coalescer.enter_suppression(now);
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &absolute))?;
        let metadata = stat(&absolute).await?;

        state
            .cache
            .set_file(&parent, name, FileEntry::from_metadata(&metadata))?;
        state.coalescer.mark_dirty(parent, ChangeKind::Structural, now);
        Ok(path)
    }

    async fn create_folder(&self, state: &mut MirrorState, raw: &str, now: Instant) -> Result<VirtualPath, ApiError> {
        let path = self.parse(raw)?;
        let (parent, _) = split(&path)?;
        self.require_cached_dir(state, &parent, now).await?;
        let absolute = self.codec.to_absolute(&path);

        state.coalescer.enter_suppression(now);
        tokio::fs::create_dir(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &absolute))?;
        let metadata = stat(&absolute).await?;

        state.cache.add_directory(&path, modified_time(&metadata))?;
        state.coalescer.mark_dirty(parent, ChangeKind::Structural, now);
        Ok(path)
    }

    async fn delete(&self, state: &mut MirrorState, raw: &str, now: Instant) -> Result<VirtualPath, ApiError> {
        let path = self.parse(raw)?;
        let (parent, name) = split(&path)?;
        let absolute = self.codec.to_absolute(&path);

        let metadata = match stat(&absolute).await {
            Ok(m) => m,
            Err(e) => return Err(self.drop_if_vanished(state, &path, e, now)),
        };

        state.coalescer.enter_suppression(now);
        if metadata.is_dir() {
            if let Err(e) = tokio::fs::remove_dir_all(&absolute).await {
                // Part of the subtree may already be gone.
                state.coalescer.mark_dirty(path.clone(), ChangeKind::Structural, now);
                state.coalescer.mark_dirty(parent, ChangeKind::Structural, now);
                return Err(StorageError::from_io(e, &absolute).into());
            }
            let removed = state.cache.remove_directory(&path);
            debug!(path = %path, removed, "Removed cached subtree");
            // Views sitting inside the deleted directory need to hear about it.
            state.coalescer.mark_dirty(path.clone(), ChangeKind::Structural, now);
        } else {
            tokio::fs::remove_file(&absolute)
                .await
                .map_err(|e| StorageError::from_io(e, &absolute))?;
            state.cache.remove_file(&parent, name);
        }
        state.coalescer.mark_dirty(parent, ChangeKind::Structural, now);
        Ok(path)
    }

    async fn move_entry(
        &self,
        state: &mut MirrorState,
        src: VirtualPath,
        requested: VirtualPath,
        now: Instant,
    ) -> Result<VirtualPath, ApiError> {
        let (src_parent, src_name) = split(&src)?;
        let (dst_parent, dst_name) = split(&requested)?;
        if requested == src {
            return Ok(src);
        }
        if requested.is_within(&src) {
            return Err(ApiError::InvalidPath(format!("cannot move {} into itself", src)));
        }
        self.require_cached_dir(state, &dst_parent, now).await?;

        let src_abs = self.codec.to_absolute(&src);
        let metadata = match stat(&src_abs).await {
            Ok(m) => m,
            Err(e) => return Err(self.drop_if_vanished(state, &src, e, now)),
        };
        let is_dir = metadata.is_dir();
        let dst = self
            .unique_destination(state, &dst_parent, dst_name, is_dir)
            .await?;
        let dst_abs = self.codec.to_absolute(&dst);

        state.coalescer.enter_suppression(now);
        tokio::fs::rename(&src_abs, &dst_abs)
            .await
            .map_err(|e| StorageError::from_io(e, &src_abs))?;

        if is_dir {
            if let Err(e) = state.cache.rename_directory(&src, &dst) {
                // The move happened on disk; let the flush reconcile both sides.
                warn!(src = %src, dst = %dst, error = %e, "Cache rename failed; scheduling rebuild");
                state.cache.remove_directory(&src);
            }
            state.registry.rebase(&src, &dst);
        } else {
            let entry = state
                .cache
                .remove_file(&src_parent, src_name)
                .unwrap_or_else(|| FileEntry::from_metadata(&metadata));
            if let Some(new_name) = dst.name() {
                state.cache.set_file(&dst_parent, new_name, entry)?;
            }
        }

        state.coalescer.mark_dirty(src_parent, ChangeKind::Structural, now);
        state.coalescer.mark_dirty(dst_parent, ChangeKind::Structural, now);
        Ok(dst)
    }

    async fn copy(&self, state: &mut MirrorState, src: &str, dst_dir: &str, now: Instant) -> Result<VirtualPath, ApiError> {
        let src = self.parse(src)?;
        let dst_dir = self.parse(dst_dir)?;
        let name = entry_name(&src)?;
        self.require_cached_dir(state, &dst_dir, now).await?;

        let src_abs = self.codec.to_absolute(&src);
        let metadata = match stat(&src_abs).await {
            Ok(m) => m,
            Err(e) => return Err(self.drop_if_vanished(state, &src, e, now)),
        };
        let is_dir = metadata.is_dir();
        if is_dir && dst_dir.is_within(&src) {
            return Err(ApiError::InvalidPath(format!("cannot copy {} into itself", src)));
        }
        let dst = self.unique_destination(state, &dst_dir, name, is_dir).await?;
        let dst_abs = self.codec.to_absolute(&dst);

        state.coalescer.enter_suppression(now);
        if is_dir {
            let (from, to) = (src_abs.clone(), dst_abs.clone());
            if let Err(e) = run_blocking(move || copy_tree(&from, &to)).await {
                // A partial copy is already on disk and the watcher is suppressed.
                state.coalescer.mark_dirty(dst_dir, ChangeKind::Structural, now);
                return Err(e.into());
            }
            let (codec, walker, target) = (self.codec.clone(), self.walker.clone(), dst.clone());
            let scan = run_blocking(move || walker.scan_subtree(&codec, &target)).await;
            state.cache.apply_subtree_scan(&dst, scan);
        } else {
            if let Err(e) = tokio::fs::copy(&src_abs, &dst_abs).await {
                state.coalescer.mark_dirty(dst_dir, ChangeKind::Structural, now);
                return Err(StorageError::from_io(e, &src_abs).into());
            }
            let copied = stat(&dst_abs).await?;
            if let Some(new_name) = dst.name() {
                state
                    .cache
                    .set_file(&dst_dir, new_name, FileEntry::from_metadata(&copied))?;
            }
        }

        state.coalescer.mark_dirty(dst_dir, ChangeKind::Structural, now);
        Ok(dst)
    }

    async fn write(&self, state: &mut MirrorState, raw: &str, contents: &[u8], now: Instant) -> Result<VirtualPath, ApiError> {
        let path = self.parse(raw)?;
        let (parent, name) = split(&path)?;
        if state.cache.contains_dir(&path) {
            return Err(ApiError::InvalidPath(format!("{} is a directory", path)));
        }
        self.require_cached_dir(state, &parent, now).await?;
        let absolute = self.codec.to_absolute(&path);
        let existed = state.cache.file(&parent, name).is_some();

        state.coalescer.enter_suppression(now);
        self.persister.persist(&absolute, contents).await?;
        let metadata = stat(&absolute).await?;

        state
            .cache
            .set_file(&parent, name, FileEntry::from_metadata(&metadata))?;
        let kind = if existed {
            ChangeKind::Content
        } else {
            ChangeKind::Structural
        };
        state.coalescer.mark_dirty(parent, kind, now);
        Ok(path)
    }

    fn parse(&self, raw: &str) -> Result<VirtualPath, ApiError> {
        VirtualPath::parse(raw)
    }

    /// Fail with not-found when `dir` is not mirrored.
    ///
    /// If the directory does exist on disk the cache is behind, so a
    /// targeted rebuild of its nearest cached ancestor is scheduled.
    async fn require_cached_dir(
        &self,
        state: &mut MirrorState,
        dir: &VirtualPath,
        now: Instant,
    ) -> Result<(), ApiError> {
        if state.cache.contains_dir(dir) {
            return Ok(());
        }
        let on_disk = tokio::fs::metadata(self.codec.to_absolute(dir))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if on_disk {
            let anchor = state.cache.nearest_cached(dir);
            debug!(dir = %dir, anchor = %anchor, "Directory not mirrored yet; scheduling rebuild");
            state.coalescer.mark_dirty(anchor, ChangeKind::Structural, now);
        }
        Err(ApiError::not_found(dir.to_string()))
    }

    /// Drop the stale cache entry for a path that vanished before use.
    fn drop_if_vanished(&self, state: &mut MirrorState, path: &VirtualPath, err: StorageError, now: Instant) -> ApiError {
        if err.is_not_found() {
            if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
                let had_file = state.cache.remove_file(&parent, name).is_some();
                let had_dir = state.cache.remove_directory(path) > 0;
                if had_file || had_dir {
                    debug!(path = %path, "Dropped stale cache entry");
                    state.coalescer.mark_dirty(parent, ChangeKind::Structural, now);
                }
            }
        }
        err.into()
    }

    /// Pick a destination name under `dir` that collides with nothing cached or on disk.
    async fn unique_destination(
        &self,
        state: &MirrorState,
        dir: &VirtualPath,
        name: &str,
        is_dir: bool,
    ) -> Result<VirtualPath, ApiError> {
        let mut taken: HashSet<String> = HashSet::new();
        if let Some(node) = state.cache.directory(dir) {
            taken.extend(node.files.keys().cloned());
        }
        taken.extend(
            state
                .cache
                .children_of(dir)
                .filter_map(|(key, _)| key.name().map(str::to_string)),
        );

        let absolute = self.codec.to_absolute(dir);
        let mut entries = tokio::fs::read_dir(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &absolute))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(e, &absolute))?
        {
            if let Some(existing) = entry.file_name().to_str() {
                taken.insert(existing.to_string());
            }
        }

        let chosen = unique_name(name, is_dir, |candidate| taken.contains(candidate));
        if chosen != name {
            debug!(dir = %dir, requested = name, chosen = %chosen, "Resolved name conflict");
        }
        dir.join(&chosen)
    }
}

fn split(path: &VirtualPath) -> Result<(VirtualPath, &str), ApiError> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(ApiError::InvalidPath(format!("{} is the mirror root", path))),
    }
}

fn entry_name(path: &VirtualPath) -> Result<&str, ApiError> {
    path.name()
        .ok_or_else(|| ApiError::InvalidPath(format!("{} is the mirror root", path)))
}

async fn stat(path: &Path) -> Result<Metadata, StorageError> {
    tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| StorageError::from_io(e, path))
}

async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}

/// Recursively copy a directory tree. Symlinks are copied as their targets.
fn copy_tree(from: &Path, to: &Path) -> Result<(), StorageError> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| from.to_path_buf());
            match e.into_io_error() {
                Some(io) => StorageError::from_io(io, &path),
                None => StorageError::IoError(io::Error::new(io::ErrorKind::Other, "filesystem loop")),
            }
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| StorageError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
        let target: PathBuf = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| StorageError::from_io(e, &target))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| StorageError::from_io(e, entry.path()))?;
        }
    }
    Ok(())
}
