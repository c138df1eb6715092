use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{object_key, ArtifactStore, ObjectMetadata};
use crate::{PipelineError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: ObjectMetadata,
}

/// In-process store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    rejected_keys: Mutex<HashSet<String>>,
    exists_calls: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without metadata
    pub fn insert(&self, folder: &str, filename: &str, data: impl Into<Vec<u8>>) {
        self.lock_objects().insert(
            object_key(folder, filename),
            StoredObject {
                data: data.into(),
                metadata: ObjectMetadata::default(),
            },
        );
    }

    /// Remove an object, returning whether it was present
    pub fn remove(&self, folder: &str, filename: &str) -> bool {
        self.lock_objects()
            .remove(&object_key(folder, filename))
            .is_some()
    }

    /// Make every subsequent `put` to this key report failure
    pub fn reject_puts_to(&self, folder: &str, filename: &str) {
        self.rejected_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(object_key(folder, filename));
    }

    pub fn data(&self, folder: &str, filename: &str) -> Option<Vec<u8>> {
        self.lock_objects()
            .get(&object_key(folder, filename))
            .map(|object| object.data.clone())
    }

    pub fn metadata(&self, folder: &str, filename: &str) -> Option<ObjectMetadata> {
        self.lock_objects()
            .get(&object_key(folder, filename))
            .map(|object| object.metadata.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_objects().keys().cloned().collect()
    }

    /// Number of `exists` queries answered so far
    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, folder: &str, filename: &str) -> bool {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.lock_objects().contains_key(&object_key(folder, filename))
    }

    async fn get(&self, folder: &str, filename: &str) -> Result<Vec<u8>> {
        let key = object_key(folder, filename);
        self.lock_objects()
            .get(&key)
            .map(|object| object.data.clone())
            .ok_or_else(|| PipelineError::NotFound(key).into())
    }

    async fn put(
        &self,
        folder: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: &ObjectMetadata,
    ) -> bool {
        let key = object_key(folder, filename);
        let rejected = self
            .rejected_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&key);
        if rejected {
            tracing::error!("Rejected write to {}", key);
            return false;
        }

        self.lock_objects().insert(
            key,
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        true
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_and_overwrite() {
        let store = MemoryArtifactStore::new();
        let metadata = ObjectMetadata::new("text/plain").with("source_file", "a.wav");

        assert!(store.put("f", "a.txt", b"one".to_vec(), &metadata).await);
        assert!(store.put("f", "a.txt", b"two".to_vec(), &metadata).await);

        assert_eq!(store.get("f", "a.txt").await.unwrap(), b"two");
        assert_eq!(
            store.metadata("f", "a.txt").unwrap().entries["source_file"],
            "a.wav"
        );
        assert_eq!(store.describe(), "memory");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryArtifactStore::new();
        assert!(!store.exists("f", "missing.txt").await);

        let err = store.get("f", "missing.txt").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NotFound(key)) if key == "f/missing.txt"
        ));
    }

    #[tokio::test]
    async fn test_rejected_put_reports_false() {
        let store = MemoryArtifactStore::new();
        store.reject_puts_to("f", "a.txt");
        assert!(!store.put("f", "a.txt", vec![1], &ObjectMetadata::default()).await);
        assert!(!store.exists("f", "a.txt").await);
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let store = MemoryArtifactStore::new();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.bin");
        let target = dir.path().join("out.bin");
        tokio::fs::write(&source, b"payload").await.unwrap();

        assert!(store.put_file("", "x.bin", &source, &ObjectMetadata::default()).await);
        assert_eq!(store.get_to_file("", "x.bin", &target).await.unwrap(), 7);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"payload");
    }
}
