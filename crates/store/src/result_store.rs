//! Result blob storage.
//!
//! One file per link under the results directory, holding the base64
//! `CommandResults` blob exactly as `CommandResults::encode` produced it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use redline_core::error::ResultStoreError;
use redline_core::store::ResultStore;
use tracing::debug;

/// Ids become file names, so only a conservative alphabet is accepted.
fn validate_id(link_id: &str) -> Result<(), ResultStoreError> {
    let valid = !link_id.is_empty()
        && link_id != "."
        && link_id != ".."
        && link_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ResultStoreError::InvalidId(link_id.to_string()))
    }
}

/// Result blobs on the local filesystem.
pub struct FileResultStore {
    directory: PathBuf,
}

impl FileResultStore {
    /// The directory is created lazily on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, link_id: &str) -> Result<PathBuf, ResultStoreError> {
        validate_id(link_id)?;
        Ok(self.directory.join(link_id))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn write_result_file(&self, link_id: &str, blob: &str) -> Result<(), ResultStoreError> {
        let path = self.path_for(link_id)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(&path, blob).await?;
        debug!(link_id, path = %path.display(), "Result written");
        Ok(())
    }

    async fn read_result_file(&self, link_id: &str) -> Result<String, ResultStoreError> {
        let path = self.path_for(link_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ResultStoreError::NotFound(link_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Result blobs held in memory. Used by tests and ephemeral servers.
#[derive(Default)]
pub struct InMemoryResultStore {
    blobs: DashMap<String, String>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn write_result_file(&self, link_id: &str, blob: &str) -> Result<(), ResultStoreError> {
        validate_id(link_id)?;
        self.blobs.insert(link_id.to_string(), blob.to_string());
        Ok(())
    }

    async fn read_result_file(&self, link_id: &str) -> Result<String, ResultStoreError> {
        self.blobs
            .get(link_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| ResultStoreError::NotFound(link_id.to_string()))
    }
}
