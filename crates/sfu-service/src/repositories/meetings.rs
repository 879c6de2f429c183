//! Meeting record persistence.
//!
//! A meeting record is created when a composite recording starts and is
//! completed exactly once when the transcoder exits.

use crate::errors::SfuError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Recording,
    Processing,
    Completed,
}

/// A participant listed on a meeting record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingParticipant {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    pub participants: Vec<MeetingParticipant>,
    pub status: MeetingStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Meeting persistence boundary.
#[async_trait]
pub trait MeetingRepository: Send + Sync {
    /// Create a record in `recording` state.
    async fn create(
        &self,
        room_id: &str,
        participants: Vec<MeetingParticipant>,
    ) -> Result<Meeting, SfuError>;

    /// Mark a record `completed`, with the output path if one was produced.
    async fn complete(
        &self,
        meeting_id: &str,
        video_path: Option<PathBuf>,
    ) -> Result<Meeting, SfuError>;

    async fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, SfuError>;
}

/// In-process meeting store.
#[derive(Debug, Default)]
pub struct InMemoryMeetingRepository {
    meetings: RwLock<HashMap<String, Meeting>>,
}

impl InMemoryMeetingRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, oldest first.
    pub async fn list(&self) -> Vec<Meeting> {
        let mut meetings: Vec<Meeting> = self.meetings.read().await.values().cloned().collect();
        meetings.sort_by_key(|m| m.started_at);
        meetings
    }
}

#[async_trait]
impl MeetingRepository for InMemoryMeetingRepository {
    async fn create(
        &self,
        room_id: &str,
        participants: Vec<MeetingParticipant>,
    ) -> Result<Meeting, SfuError> {
        let meeting = Meeting {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            video_path: None,
            participants,
            status: MeetingStatus::Recording,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.meetings
            .write()
            .await
            .insert(meeting.id.clone(), meeting.clone());
        Ok(meeting)
    }

    async fn complete(
        &self,
        meeting_id: &str,
        video_path: Option<PathBuf>,
    ) -> Result<Meeting, SfuError> {
        let mut meetings = self.meetings.write().await;
        let meeting = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| SfuError::Storage(format!("meeting {meeting_id} not found")))?;
        meeting.status = MeetingStatus::Completed;
        meeting.video_path = video_path;
        meeting.ended_at = Some(Utc::now());
        Ok(meeting.clone())
    }

    async fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, SfuError> {
        Ok(self.meetings.read().await.get(meeting_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn participants() -> Vec<MeetingParticipant> {
        vec![MeetingParticipant {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
        }]
    }

    #[tokio::test]
    async fn test_create_then_complete() {
        let repo = InMemoryMeetingRepository::new();
        let meeting = repo.create("room-1", participants()).await.unwrap();
        assert_eq!(meeting.status, MeetingStatus::Recording);
        assert!(meeting.ended_at.is_none());

        let done = repo
            .complete(&meeting.id, Some(PathBuf::from("/tmp/room-1_1.mp4")))
            .await
            .unwrap();
        assert_eq!(done.status, MeetingStatus::Completed);
        assert_eq!(done.video_path, Some(PathBuf::from("/tmp/room-1_1.mp4")));
        assert!(done.ended_at.is_some());

        let stored = repo.get(&meeting.id).await.unwrap().unwrap();
        assert_eq!(stored, done);
    }

    #[tokio::test]
    async fn test_complete_unknown_meeting_fails() {
        let repo = InMemoryMeetingRepository::new();
        let result = repo.complete("missing", None).await;
        assert!(matches!(result, Err(SfuError::Storage(_))));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&MeetingStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
