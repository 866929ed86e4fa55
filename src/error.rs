//! Error types for the mirror, its filesystem access, and observer-facing APIs.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Filesystem-level failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl StorageError {
    /// Classify an I/O error raised while touching `path`.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let shown = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(shown),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(shown),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(shown),
            _ => StorageError::IoError(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Errors surfaced to callers of the mirror (observers, the server, the binary).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Delivery unready for observer {0}")]
    DeliveryUnready(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classes used to decide how a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Entity vanished between check and use; drop the stale entry.
    NotFound,
    /// Traversal or disallowed characters; nothing was attempted.
    InvalidPath,
    /// Reported to the requesting observer, cache untouched.
    PermissionDenied,
    /// Observer channel not writable; the delivery is dropped.
    DeliveryUnready,
    /// Anything else; logged, last-known-good state kept.
    Internal,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::InvalidPath(_) => ErrorClass::InvalidPath,
            ApiError::StorageError(StorageError::NotFound(_)) => ErrorClass::NotFound,
            ApiError::StorageError(StorageError::PermissionDenied(_)) | ApiError::Unauthorized(_) => {
                ErrorClass::PermissionDenied
            }
            ApiError::DeliveryUnready(_) => ErrorClass::DeliveryUnready,
            _ => ErrorClass::Internal,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ApiError::StorageError(StorageError::NotFound(what.into()))
    }
}
