//! Chat message persistence.
//!
//! Messages are append-only and room-scoped. History pages are returned
//! oldest to newest: the newest `limit` messages strictly before the
//! optional cursor.

use crate::errors::SfuError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::ChatMessageType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_email: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub message_type: ChatMessageType,
}

/// Chat persistence boundary.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Persist a message and return the stored form.
    async fn save(&self, message: ChatMessage) -> Result<ChatMessage, SfuError>;

    /// Newest `limit` messages before `before`, ordered oldest to newest.
    async fn history(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, SfuError>;
}

/// In-process chat store.
#[derive(Debug, Default)]
pub struct InMemoryChatRepository {
    rooms: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn save(&self, message: ChatMessage) -> Result<ChatMessage, SfuError> {
        let mut rooms = self.rooms.write().await;
        let messages = rooms.entry(message.room_id.clone()).or_default();
        // Kept sorted by timestamp; equal timestamps keep arrival order.
        let at = messages.partition_point(|m| m.timestamp <= message.timestamp);
        messages.insert(at, message.clone());
        Ok(message)
    }

    async fn history(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, SfuError> {
        let rooms = self.rooms.read().await;
        let Some(messages) = rooms.get(room_id) else {
            return Ok(Vec::new());
        };

        let end = before.map_or(messages.len(), |cursor| {
            messages.partition_point(|m| m.timestamp < cursor)
        });
        let start = end.saturating_sub(limit);
        Ok(messages.get(start..end).map(<[_]>::to_vec).unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(room: &str, content: &str, timestamp: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: format!("msg-{content}"),
            room_id: room.to_string(),
            sender_id: "alice".to_string(),
            sender_name: "Alice".to_string(),
            sender_email: "alice@example.com".to_string(),
            content: content.to_string(),
            timestamp,
            message_type: ChatMessageType::Text,
        }
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_history_returns_newest_page_oldest_first() {
        let repo = InMemoryChatRepository::new();
        let base = Utc::now();
        for (i, text) in ["one", "two", "three", "four"].iter().enumerate() {
            let offset = Duration::seconds(i64::try_from(i).unwrap());
            repo.save(message("room-1", text, base + offset)).await.unwrap();
        }

        let page = repo.history("room-1", 2, None).await.unwrap();
        assert_eq!(contents(&page), vec!["three", "four"]);

        let earlier = repo
            .history("room-1", 10, Some(base + Duration::seconds(2)))
            .await
            .unwrap();
        assert_eq!(contents(&earlier), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_history_is_room_scoped() {
        let repo = InMemoryChatRepository::new();
        let now = Utc::now();
        repo.save(message("room-1", "hello", now)).await.unwrap();
        repo.save(message("room-2", "other", now)).await.unwrap();

        let page = repo.history("room-1", 50, None).await.unwrap();
        assert_eq!(contents(&page), vec!["hello"]);
        assert!(repo.history("room-3", 50, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_save_is_sorted() {
        let repo = InMemoryChatRepository::new();
        let now = Utc::now();
        repo.save(message("room-1", "late", now)).await.unwrap();
        repo.save(message("room-1", "early", now - Duration::seconds(5)))
            .await
            .unwrap();

        let page = repo.history("room-1", 50, None).await.unwrap();
        assert_eq!(contents(&page), vec!["early", "late"]);
    }

    #[test]
    fn test_message_type_serializes_as_type() {
        let value =
            serde_json::to_value(message("room-1", "hi", Utc::now())).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["senderName"], "Alice");
    }
}
