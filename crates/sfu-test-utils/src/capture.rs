//! Collaborators that record what the recorder hands them.

use async_trait::async_trait;
use sfu_service::errors::SfuError;
use sfu_service::services::{BlobStore, EventPublisher, RecordingCompletedEvent, StoredObject};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Event publisher that keeps every event.
#[derive(Debug, Default)]
pub struct CapturingPublisher {
    events: Mutex<Vec<RecordingCompletedEvent>>,
}

impl CapturingPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordingCompletedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish_recording_completed(
        &self,
        event: &RecordingCompletedEvent,
    ) -> Result<(), SfuError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

/// Blob store that records uploads without copying anything.
#[derive(Debug, Default)]
pub struct CapturingBlobStore {
    uploads: Mutex<Vec<(PathBuf, String)>>,
    fail: bool,
}

impl CapturingBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose uploads always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(local_path, room_id)` of every upload attempt.
    #[must_use]
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for CapturingBlobStore {
    async fn upload(&self, local_path: &Path, room_id: &str) -> Result<StoredObject, SfuError> {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((local_path.to_path_buf(), room_id.to_string()));
        }
        if self.fail {
            return Err(SfuError::Storage("simulated upload failure".to_string()));
        }
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording.mp4");
        let key = format!("recordings/{room_id}/{file_name}");
        Ok(StoredObject {
            bucket: "recordings".to_string(),
            url: format!("http://test.local/recordings/{key}"),
            key,
        })
    }
}
