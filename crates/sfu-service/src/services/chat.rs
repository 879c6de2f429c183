//! Chat pass-through.
//!
//! Validates user messages, stamps them with an id and server time, and
//! hands them to the [`ChatRepository`]. Also builds the system notices
//! posted when peers join or leave.

use crate::errors::SfuError;
use crate::repositories::{ChatMessage, ChatRepository};
use chrono::{DateTime, Utc};
use common::types::{ChatMessageType, PeerInfo};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Maximum message length in characters, after trimming.
pub const MAX_CONTENT_CHARS: usize = 2000;

pub const SYSTEM_SENDER_ID: &str = "system";
pub const SYSTEM_SENDER_NAME: &str = "System";
pub const SYSTEM_SENDER_EMAIL: &str = "system@meeting.local";

/// Chat operations used by signaling and the REST surface.
#[derive(Clone)]
pub struct ChatService {
    repository: Arc<dyn ChatRepository>,
    default_limit: usize,
}

impl ChatService {
    #[must_use]
    pub fn new(repository: Arc<dyn ChatRepository>, default_limit: usize) -> Self {
        Self {
            repository,
            default_limit,
        }
    }

    /// Store a message sent by `sender`.
    #[instrument(skip_all, name = "sfu.chat.send", fields(room_id = %room_id, sender_id = %sender.user_id))]
    pub async fn send(
        &self,
        room_id: &str,
        sender: &PeerInfo,
        content: &str,
        message_type: ChatMessageType,
    ) -> Result<ChatMessage, SfuError> {
        let content = validate_content(content)?;
        let stored = self
            .repository
            .save(ChatMessage {
                id: Uuid::new_v4().to_string(),
                room_id: room_id.to_string(),
                sender_id: sender.user_id.clone(),
                sender_name: sender.name.clone(),
                sender_email: sender.email.clone(),
                content,
                timestamp: Utc::now(),
                message_type,
            })
            .await?;

        debug!(
            target: "sfu.chat",
            room_id = %room_id,
            message_id = %stored.id,
            "Chat message stored"
        );
        Ok(stored)
    }

    /// Store a server-generated notice.
    pub async fn system_message(
        &self,
        room_id: &str,
        content: &str,
    ) -> Result<ChatMessage, SfuError> {
        let sender = PeerInfo {
            user_id: SYSTEM_SENDER_ID.to_string(),
            name: SYSTEM_SENDER_NAME.to_string(),
            email: SYSTEM_SENDER_EMAIL.to_string(),
        };
        self.send(room_id, &sender, content, ChatMessageType::System)
            .await
    }

    /// A page of history. A missing or zero `limit` uses the configured default.
    pub async fn history(
        &self,
        room_id: &str,
        limit: Option<usize>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, SfuError> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(self.default_limit);
        self.repository.history(room_id, limit, before).await
    }
}

fn validate_content(content: &str) -> Result<String, SfuError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SfuError::InvalidRequest(
            "Message content cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(SfuError::InvalidRequest(format!(
            "Message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}
