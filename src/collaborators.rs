//! External collaborators consumed by the mirror.
//!
//! Session validation and content persistence are owned by other services;
//! the mirror only depends on these traits.

use crate::error::{ApiError, StorageError};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::path::Path;

/// Authenticated identity of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
}

/// Verifies that a connection is allowed to observe the mirror.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<Identity, ApiError>;
}

/// Accepts every connection.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _headers: &HeaderMap, _query_token: Option<&str>) -> Result<Identity, ApiError> {
        Ok(Identity {
            name: "anonymous".to_string(),
        })
    }
}

/// Accepts connections presenting a fixed shared token, either as
/// `Authorization: Bearer <token>` or as the `token` query parameter.
#[derive(Debug, Clone)]
pub struct TokenAuthorizer {
    token: String,
}

impl TokenAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<Identity, ApiError> {
        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match bearer.or(query_token) {
            Some(presented) if presented == self.token => Ok(Identity {
                name: "token".to_string(),
            }),
            Some(_) => Err(ApiError::Unauthorized("invalid token".to_string())),
            None => Err(ApiError::Unauthorized("missing token".to_string())),
        }
    }
}

/// Persists a byte stream under a path.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn persist(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Writes straight to the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsPersister;

#[async_trait]
impl Persister for FsPersister {
    async fn persist(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StorageError::from_io(e, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_token_authorizer() {
        let auth = TokenAuthorizer::new("s3cret");
        let mut headers = HeaderMap::new();
        assert!(auth.authorize(&headers, None).await.is_err());
        assert!(auth.authorize(&headers, Some("s3cret")).await.is_ok());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert!(auth.authorize(&headers, None).await.is_err());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cret"),
        );
        assert!(auth.authorize(&headers, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_fs_persister_writes_bytes() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("out.txt");
        FsPersister.persist(&target, b"hello").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");

        let missing = temp.path().join("no/such/dir.txt");
        let err = FsPersister.persist(&missing, b"x").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
