use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::pipeline::error::PipelineError;

/// Reads raw batch files from object storage.
#[async_trait]
pub trait StorageReader: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Storage rooted at a local directory; locators are relative paths.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageReader for LocalStorage {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, PipelineError> {
        let path = self.root.join(locator.trim_start_matches('/'));
        tokio::fs::read(&path).await.map_err(|e| {
            PipelineError::storage(format!("Cannot read '{locator}': {e}"))
                .with_detail("path", path.display().to_string())
        })
    }
}

/// In-memory object store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryStorage {
    objects: HashMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, locator: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.objects.insert(locator.to_string(), bytes.into());
        self
    }
}

#[async_trait]
impl StorageReader for InMemoryStorage {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, PipelineError> {
        self.objects
            .get(locator)
            .cloned()
            .ok_or_else(|| PipelineError::storage(format!("Object not found: {locator}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_storage_reads_relative_locator() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("raw/ins")).unwrap();
        std::fs::write(dir.path().join("raw/ins/a.csv"), b"x,y").unwrap();

        let storage = LocalStorage::new(dir.path());
        assert_eq!(storage.fetch("raw/ins/a.csv").await.unwrap(), b"x,y");
        assert_eq!(storage.fetch("/raw/ins/a.csv").await.unwrap(), b"x,y");
    }

    #[tokio::test]
    async fn missing_object_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalStorage::new(dir.path()).fetch("nope.pdf").await.unwrap_err();
        assert_eq!(err.kind(), "Storage");
        assert!(err.is_retryable());

        let err = InMemoryStorage::new().fetch("nope").await.unwrap_err();
        assert_eq!(err.kind(), "Storage");
    }
}
