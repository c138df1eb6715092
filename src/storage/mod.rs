//! Artifact storage: the durable medium between pipeline stages.
//!
//! Objects are addressed by `(folder, filename)`; the folder is a key prefix, not a real
//! directory. Implementations must honour the contracts documented on [`ArtifactStore`],
//! because the orchestrator treats the store as its only checkpoint.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use crate::Result;

pub mod memory;
pub mod s3;

pub use memory::MemoryArtifactStore;
pub use s3::S3ArtifactStore;

/// Metadata attached to a stored object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub entries: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

/// Build the object key for a file inside a folder
pub fn object_key(folder: &str, filename: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", folder, filename)
    }
}

/// Split a `folder/sub/file.ext` path into its folder and file name
pub fn split_path(path: &str) -> (String, String) {
    let path = path.trim_start_matches('/');
    match path.rsplit_once('/') {
        Some((folder, file)) => (folder.to_string(), file.to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Blob store addressed by folder and file name
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether the object exists. Never fails: any error reads as absent.
    async fn exists(&self, folder: &str, filename: &str) -> bool;

    /// Fetch an object's bytes, failing with [`crate::PipelineError::NotFound`] when absent
    async fn get(&self, folder: &str, filename: &str) -> Result<Vec<u8>>;

    /// Store (or overwrite) an object. Never fails: returns `false` on error.
    async fn put(
        &self,
        folder: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: &ObjectMetadata,
    ) -> bool;

    /// Human-readable name of the backend, for logs
    fn describe(&self) -> String;

    /// Fetch an object into a local file
    async fn get_to_file(&self, folder: &str, filename: &str, path: &Path) -> Result<u64> {
        let data = self.get(folder, filename).await?;
        let size = data.len() as u64;
        tokio::fs::write(path, data).await?;
        Ok(size)
    }

    /// Store a local file. Never fails: returns `false` on error.
    async fn put_file(
        &self,
        folder: &str,
        filename: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> bool {
        match tokio::fs::read(path).await {
            Ok(data) => self.put(folder, filename, data, metadata).await,
            Err(e) => {
                tracing::error!("Cannot read {} for upload: {}", path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "a.mp4"), "a.mp4");
        assert_eq!(object_key("downloads", "a.mp4"), "downloads/a.mp4");
        assert_eq!(object_key("/downloads/", "a.mp4"), "downloads/a.mp4");
    }

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("folder/sub/video.mp4"),
            ("folder/sub".to_string(), "video.mp4".to_string())
        );
        assert_eq!(split_path("video.mp4"), (String::new(), "video.mp4".to_string()));
    }
}
