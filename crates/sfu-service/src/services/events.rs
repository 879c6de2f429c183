//! Recording-completed event publication.

use crate::errors::SfuError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Exchange the event is published on.
pub const EXCHANGE_NAME: &str = "meetings";

/// Routing key of the event.
pub const ROUTING_KEY: &str = "recording.completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParticipant {
    pub user_email: String,
    pub user_name: String,
}

/// Published once a recording has been uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingCompletedEvent {
    pub meeting_id: String,
    pub room_id: String,
    pub video_url: String,
    pub video_bucket: String,
    pub video_key: String,
    pub participants: Vec<EventParticipant>,
}

/// Event bus boundary.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_recording_completed(
        &self,
        event: &RecordingCompletedEvent,
    ) -> Result<(), SfuError>;
}

/// Publisher that writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_recording_completed(
        &self,
        event: &RecordingCompletedEvent,
    ) -> Result<(), SfuError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| SfuError::Internal(format!("event serialization failed: {e}")))?;
        info!(
            target: "sfu.events",
            exchange = EXCHANGE_NAME,
            routing_key = ROUTING_KEY,
            meeting_id = %event.meeting_id,
            room_id = %event.room_id,
            participant_count = event.participants.len(),
            payload = %payload,
            "Published recording.completed event"
        );
        Ok(())
    }
}
