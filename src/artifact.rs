//! Artifact storage consumed by the pipeline
//!
//! Rendered bytes live behind the [`ArtifactStore`] trait: an in-memory
//! implementation for tests and a filesystem implementation for the binary.
//! Retrieval URLs are time-limited; the expiry is stamped into the URL so
//! embedders can enforce it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::error::CaptureError;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under `key`, returning the key on success.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, CaptureError>;

    /// Issue a time-limited retrieval URL for a stored artifact.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, CaptureError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, CaptureError>;

    async fn delete(&self, key: &str) -> Result<(), CaptureError>;
}

#[derive(Debug, Clone)]
struct StoredArtifact {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory artifact store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<String, StoredArtifact>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            artifacts: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn content_type_of(&self, key: &str) -> Option<String> {
        self.artifacts.get(key).map(|a| a.content_type.clone())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        _metadata: Option<serde_json::Value>,
    ) -> Result<String, CaptureError> {
        debug!(key, size = bytes.len(), content_type, "storing artifact");
        self.artifacts.insert(
            key.to_string(),
            StoredArtifact {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(key.to_string())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, CaptureError> {
        if !self.artifacts.contains_key(key) {
            return Err(CaptureError::NotFound(format!("artifact {key}")));
        }
        let expires = (Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)).timestamp();
        Ok(format!("memory://{key}?expires={expires}"))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, CaptureError> {
        self.artifacts
            .get(key)
            .map(|a| a.bytes.clone())
            .ok_or_else(|| CaptureError::NotFound(format!("artifact {key}")))
    }

    async fn delete(&self, key: &str) -> Result<(), CaptureError> {
        self.artifacts
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| CaptureError::NotFound(format!("artifact {key}")))
    }
}

/// Filesystem-backed artifact store rooted at a directory.
///
/// Keys map to paths under the root; retrieval URLs are `file://` links with
/// the expiry stamped as a query parameter.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CaptureError> {
        // Keys are produced by `utils::artifact_key`; reject anything that
        // could climb out of the root.
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(CaptureError::Upload(format!("invalid artifact key `{key}`")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        _metadata: Option<serde_json::Value>,
    ) -> Result<String, CaptureError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CaptureError::Upload(e.to_string()))?;
        }
        debug!(key, size = bytes.len(), content_type, path = %path.display(), "writing artifact");
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CaptureError::Upload(e.to_string()))?;
        Ok(key.to_string())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, CaptureError> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CaptureError::Io(e.to_string()))?
        {
            return Err(CaptureError::NotFound(format!("artifact {key}")));
        }
        let expires = (Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)).timestamp();
        Ok(format!("file://{}?expires={expires}", path.display()))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, CaptureError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| CaptureError::NotFound(format!("artifact {key}")))
    }

    async fn delete(&self, key: &str) -> Result<(), CaptureError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|_| CaptureError::NotFound(format!("artifact {key}")))
    }
}
