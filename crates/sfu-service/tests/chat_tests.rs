//! Chat and participant listing over signaling.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::ChatMessageType;
use serde_json::json;
use sfu_service::signaling::ServerMessage;
use sfu_test_utils::{TestClient, TestSfu};

const ROOM: &str = "retro";

async fn send_text(client: &mut TestClient, sender: &str, content: &str) {
    client
        .send(
            "send-message",
            json!({ "roomId": ROOM, "senderId": sender, "content": content }),
        )
        .await;
}

async fn history(client: &mut TestClient, data: serde_json::Value) -> Vec<String> {
    client.drain();
    client.send("get-chat-history", data).await;
    client
        .drain()
        .into_iter()
        .find_map(|m| match m {
            ServerMessage::ChatHistory(h) => Some(h.messages),
            _ => None,
        })
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.content)
        .collect()
}

#[tokio::test]
async fn test_message_is_confirmed_to_sender_and_delivered_to_others() -> Result<(), anyhow::Error>
{
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    alice.drain();
    bob.drain();

    send_text(&mut alice, "alice", "  hello there  ").await;

    let sent = alice.drain();
    assert_eq!(sent.len(), 1);
    let Some(ServerMessage::MessageSent(confirmed)) = sent.first() else {
        anyhow::bail!("expected message-sent, got {sent:?}");
    };
    assert_eq!(confirmed.content, "hello there");
    assert_eq!(confirmed.sender_id, "alice");
    assert_eq!(confirmed.sender_name, "Alice");
    assert_eq!(confirmed.sender_email, "alice@example.com");
    assert_eq!(confirmed.message_type, ChatMessageType::Text);

    let delivered = bob
        .wait_for(|m| matches!(m, ServerMessage::NewMessage(_)))
        .await;
    assert!(matches!(
        delivered,
        Some(ServerMessage::NewMessage(m)) if m.id == confirmed.id && m.room_id == ROOM
    ));
    Ok(())
}

#[tokio::test]
async fn test_blank_message_is_rejected() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    alice.drain();
    bob.drain();

    send_text(&mut alice, "alice", "   ").await;

    let replies = alice.drain();
    assert!(matches!(
        replies.first(),
        Some(ServerMessage::Error(e)) if e.message.contains("cannot be empty")
    ));
    assert!(bob.drain().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sender_must_be_in_the_room() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    alice.drain();

    send_text(&mut alice, "mallory", "hi").await;

    let replies = alice.drain();
    assert!(matches!(
        replies.first(),
        Some(ServerMessage::Error(e)) if e.message == "Connection has not joined a room"
    ));
    Ok(())
}

#[tokio::test]
async fn test_cannot_post_as_another_participant() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    alice.drain();
    bob.drain();

    bob.send(
        "send-message",
        json!({ "roomId": ROOM, "senderId": "alice", "content": "forged", "type": "system" }),
    )
    .await;

    let replies = bob.drain();
    assert_eq!(replies.len(), 1, "unexpected replies {replies:?}");
    assert!(matches!(
        replies.first(),
        Some(ServerMessage::Error(e)) if e.message == "Connection has not joined a room"
    ));
    assert!(alice.drain().is_empty());

    let stored = history(&mut alice, json!({ "roomId": ROOM })).await;
    assert!(!stored.iter().any(|content| content == "forged"));
    Ok(())
}

#[tokio::test]
async fn test_clients_cannot_send_system_messages() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    alice.drain();
    bob.drain();

    bob.send(
        "send-message",
        json!({ "roomId": ROOM, "senderId": "bob", "content": "Alice left the room", "type": "system" }),
    )
    .await;

    let replies = bob.drain();
    assert!(matches!(
        replies.first(),
        Some(ServerMessage::Error(e)) if e.message.starts_with("Invalid request")
    ));
    assert!(alice.drain().is_empty());

    // A file reference is still an ordinary user message.
    bob.send(
        "send-message",
        json!({ "roomId": ROOM, "senderId": "bob", "content": "notes.pdf", "type": "file" }),
    )
    .await;
    let delivered = alice
        .wait_for(|m| matches!(m, ServerMessage::NewMessage(_)))
        .await;
    assert!(matches!(
        delivered,
        Some(ServerMessage::NewMessage(m))
            if m.sender_id == "bob" && m.message_type == ChatMessageType::File
    ));
    Ok(())
}

#[tokio::test]
async fn test_history_is_oldest_first_and_limited() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    for content in ["one", "two", "three"] {
        send_text(&mut alice, "alice", content).await;
    }

    let all = history(&mut bob, json!({ "roomId": ROOM })).await;
    assert_eq!(
        all,
        vec![
            "Alice joined the room",
            "Bob joined the room",
            "one",
            "two",
            "three"
        ]
    );

    let latest = history(&mut bob, json!({ "roomId": ROOM, "limit": 2 })).await;
    assert_eq!(latest, vec!["two", "three"]);
    Ok(())
}

#[tokio::test]
async fn test_history_requires_membership() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    send_text(&mut alice, "alice", "private").await;

    let mut outsider = sfu.connect();
    outsider.send("get-chat-history", json!({ "roomId": ROOM })).await;

    let replies = outsider.drain();
    assert!(matches!(
        replies.first(),
        Some(ServerMessage::Error(e)) if e.message == "Connection has not joined a room"
    ));
    Ok(())
}

#[tokio::test]
async fn test_participants_listed_in_join_order() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "").await;
    bob.drain();

    bob.send("get-participants", json!({ "roomId": ROOM })).await;

    let list = bob
        .drain()
        .into_iter()
        .find_map(|m| match m {
            ServerMessage::ParticipantsList(list) => Some(list),
            _ => None,
        })
        .unwrap();
    assert_eq!(list.room_id, ROOM);
    assert_eq!(list.count, 2);
    let names: Vec<(&str, &str)> = list
        .participants
        .iter()
        .map(|p| (p.user_id.as_str(), p.name.as_str()))
        .collect();
    assert_eq!(names, vec![("alice", "Alice"), ("bob", "Guest")]);
    Ok(())
}
