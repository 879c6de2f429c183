//! Recording object storage.

use crate::errors::SfuError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default bucket for finished recordings.
pub const RECORDINGS_BUCKET: &str = "recordings";

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

/// Object storage boundary.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a finished recording for `room_id`.
    async fn upload(&self, local_path: &Path, room_id: &str) -> Result<StoredObject, SfuError>;
}

/// Blob store backed by a local directory laid out as `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    bucket: String,
    public_base_url: String,
}

impl LocalBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: RECORDINGS_BUCKET.to_string(),
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, local_path: &Path, room_id: &str) -> Result<StoredObject, SfuError> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SfuError::Storage(format!("invalid upload path {}", local_path.display()))
            })?;
        let key = format!("recordings/{room_id}/{file_name}");
        let destination = self.root.join(&self.bucket).join(&key);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SfuError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let size = tokio::fs::copy(local_path, &destination)
            .await
            .map_err(|e| SfuError::Storage(format!("copy {}: {e}", local_path.display())))?;

        let url = format!("{}/{}/{key}", self.public_base_url, self.bucket);
        info!(
            target: "sfu.storage",
            bucket = %self.bucket,
            key = %key,
            size,
            url = %url,
            "Uploaded recording"
        );

        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key,
            url,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_copies_file_and_builds_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("room-1_1700000000000.mp4");
        tokio::fs::write(&source, b"mp4").await.unwrap();

        let store = LocalBlobStore::new(dir.path().join("store"), "http://sfu.local");
        let object = store.upload(&source, "room-1").await.unwrap();

        assert_eq!(object.bucket, "recordings");
        assert_eq!(object.key, "recordings/room-1/room-1_1700000000000.mp4");
        assert_eq!(
            object.url,
            "http://sfu.local/recordings/recordings/room-1/room-1_1700000000000.mp4"
        );
        let copied = dir
            .path()
            .join("store")
            .join("recordings")
            .join(&object.key);
        assert_eq!(tokio::fs::read(copied).await.unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://sfu.local");
        let result = store.upload(&dir.path().join("nope.mp4"), "room-1").await;
        assert!(matches!(result, Err(SfuError::Storage(_))));
    }
}
