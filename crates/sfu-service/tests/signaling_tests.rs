//! Signaling integration tests.
//!
//! Drives real `SignalingHandler`s through the `TestSfu` harness:
//! - join ordering and room announcements
//! - media exchange between two peers
//! - leave cascades and room cleanup
//! - ownership and precondition errors
//! - duplicate-join policies

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{MediaKind, TransportDirection};
use serde_json::json;
use sfu_service::actors::SESSION_REPLACED_MESSAGE;
use sfu_service::config::DuplicateJoinPolicy;
use sfu_service::signaling::ServerMessage;
use sfu_test_utils::{empty_capabilities, event_name, to_json, TestClient, TestSfu};
use std::time::Duration;

const ROOM: &str = "standup";

fn error_messages(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Error(e) => Some(e.message.clone()),
            _ => None,
        })
        .collect()
}

/// Alice joins and publishes video and audio; returns her client and the
/// producer ids.
async fn publishing_alice(sfu: &TestSfu) -> anyhow::Result<(TestClient, String, String)> {
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    alice
        .open_transport(ROOM, "alice", TransportDirection::Send)
        .await?;
    let video = alice.publish(ROOM, "alice", MediaKind::Video).await?;
    let audio = alice.publish(ROOM, "alice", MediaKind::Audio).await?;
    alice.drain();
    Ok((alice, video, audio))
}

/// Let producer-close watchers report back to the registry.
async fn settle(sfu: &TestSfu) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = sfu.registry().stats().await;
}

// ============================================================================
// Join and media exchange
// ============================================================================

#[tokio::test]
async fn test_join_replies_in_order() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();

    let events: Vec<String> = alice
        .join(ROOM, "alice", "Alice")
        .await
        .iter()
        .map(event_name)
        .collect();

    assert_eq!(
        events,
        vec!["router-rtp-capabilities", "joined_room", "new-message"]
    );
    assert!(alice.capabilities().is_some());
    assert_eq!(alice.session(), Some((ROOM, "alice")));
    Ok(())
}

#[tokio::test]
async fn test_second_peer_sees_existing_producers_and_is_announced() -> Result<(), anyhow::Error>
{
    let sfu = TestSfu::start().await?;
    let (mut alice, video, audio) = publishing_alice(&sfu).await?;

    let mut bob = sfu.connect();
    let joined = bob.join(ROOM, "bob", "Bob").await;

    let events: Vec<String> = joined.iter().map(event_name).collect();
    assert_eq!(
        events,
        vec![
            "router-rtp-capabilities",
            "new-producer",
            "new-producer",
            "joined_room",
            "new-message"
        ]
    );
    let announced: Vec<_> = joined
        .iter()
        .filter_map(|m| match m {
            ServerMessage::NewProducer(p) => Some(p.clone()),
            _ => None,
        })
        .collect();
    let ids: Vec<&str> = announced.iter().map(|p| p.producer_id.as_str()).collect();
    assert!(ids.contains(&video.as_str()));
    assert!(ids.contains(&audio.as_str()));
    assert!(announced
        .iter()
        .all(|p| p.user_id == "alice" && p.producer_name == "Alice"));

    // Alice hears about Bob through chat and the participant event.
    let received = alice.drain();
    assert!(received.iter().any(|m| matches!(
        m,
        ServerMessage::NewMessage(msg) if msg.content == "Bob joined the room"
    )));
    assert!(received.iter().any(|m| matches!(
        m,
        ServerMessage::ParticipantJoined(p) if p.user_id == "bob" && p.name == "Bob"
    )));
    // Bob does not get his own participant-joined.
    assert!(!joined
        .iter()
        .any(|m| matches!(m, ServerMessage::ParticipantJoined(_))));
    Ok(())
}

#[tokio::test]
async fn test_peer_consumes_published_track() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let (_alice, video, _audio) = publishing_alice(&sfu).await?;

    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    bob.open_transport(ROOM, "bob", TransportDirection::Recv)
        .await?;

    let consumer = bob.subscribe(ROOM, "bob", &video).await?;
    assert_eq!(consumer.producer_id, video);
    assert_eq!(consumer.kind, MediaKind::Video);
    assert!(!consumer.id.is_empty());

    let room = sfu.registry().get_room(ROOM).await?.unwrap();
    assert_eq!(room.consumer_count, 1);
    assert_eq!(room.producer_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_new_producer_is_announced_to_others_only() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    alice.drain();
    bob.drain();

    alice
        .open_transport(ROOM, "alice", TransportDirection::Send)
        .await?;
    let producer_id = alice.publish(ROOM, "alice", MediaKind::Audio).await?;

    let announced = bob
        .wait_for(|m| matches!(m, ServerMessage::NewProducer(_)))
        .await;
    assert!(matches!(
        announced,
        Some(ServerMessage::NewProducer(p)) if p.producer_id == producer_id && p.kind == MediaKind::Audio
    ));
    assert!(!alice
        .drain()
        .iter()
        .any(|m| matches!(m, ServerMessage::NewProducer(_))));
    Ok(())
}

// ============================================================================
// Leaving
// ============================================================================

#[tokio::test]
async fn test_last_leave_removes_room() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    assert!(sfu.registry().get_room(ROOM).await?.is_some());

    alice.send("leave_room", json!({})).await;

    assert!(sfu.registry().get_room(ROOM).await?.is_none());
    let stats = sfu.registry().stats().await?;
    assert_eq!(stats.rooms, 0);
    assert_eq!(stats.peers, 0);
    assert_eq!(alice.session(), None);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_closes_producers_once_and_announces_leave() -> Result<(), anyhow::Error>
{
    let sfu = TestSfu::start().await?;
    let (mut alice, video, audio) = publishing_alice(&sfu).await?;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;

    alice.close().await;
    settle(&sfu).await;

    let received = bob.drain();
    let mut closed: Vec<String> = received
        .iter()
        .filter_map(|m| match m {
            ServerMessage::ProducerClosed(p) => Some(p.producer_id.clone()),
            _ => None,
        })
        .collect();
    closed.sort();
    let mut expected = vec![video, audio];
    expected.sort();
    assert_eq!(closed, expected);

    let left: Vec<_> = received
        .iter()
        .filter(|m| matches!(m, ServerMessage::PeerLeft(p) if p.user_id == "alice"))
        .collect();
    assert_eq!(left.len(), 1);
    assert!(received.iter().any(|m| matches!(
        m,
        ServerMessage::NewMessage(msg) if msg.content == "Alice left the room"
    )));

    let room = sfu.registry().get_room(ROOM).await?.unwrap();
    assert_eq!(room.peers.len(), 1);
    assert_eq!(room.producer_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;

    alice.close().await;
    alice.close().await;

    assert_eq!(sfu.registry().stats().await?.peers, 0);
    Ok(())
}

// ============================================================================
// Request errors
// ============================================================================

#[tokio::test]
async fn test_closing_another_peers_producer_is_denied() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let (_alice, video, _audio) = publishing_alice(&sfu).await?;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;

    bob.send(
        "close-producer",
        json!({ "roomId": ROOM, "userId": "bob", "producerId": video }),
    )
    .await;

    let errors = error_messages(&bob.drain());
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().all(|e| e.starts_with("Permission denied")));
    assert_eq!(sfu.registry().get_room(ROOM).await?.unwrap().producer_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_consume_without_receive_transport_fails() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let (_alice, video, _audio) = publishing_alice(&sfu).await?;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;

    let result = bob.subscribe(ROOM, "bob", &video).await;

    let err = result.unwrap_err().to_string();
    assert!(err.contains("Transport not found"), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn test_consume_with_incompatible_capabilities_fails() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let (_alice, video, _audio) = publishing_alice(&sfu).await?;
    let mut bob = sfu.connect();
    bob.join(ROOM, "bob", "Bob").await;
    bob.open_transport(ROOM, "bob", TransportDirection::Recv)
        .await?;

    bob.send(
        "consume",
        json!({
            "roomId": ROOM,
            "userId": "bob",
            "producerId": video,
            "rtpCapabilities": to_json(&empty_capabilities()),
        }),
    )
    .await;

    let errors = error_messages(&bob.drain());
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().all(|e| e.starts_with("Cannot consume")));
    assert_eq!(sfu.registry().get_room(ROOM).await?.unwrap().consumer_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_event_keeps_connection_usable() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();

    alice.send("teleport", json!({})).await;
    alice.send_raw("{not json").await;
    let errors = error_messages(&alice.drain());
    assert_eq!(errors.len(), 2);
    assert!(errors.first().is_some_and(|e| e.contains("Unknown event")));
    assert!(errors.get(1).is_some_and(|e| e.contains("Invalid JSON")));

    let joined = alice.join(ROOM, "alice", "Alice").await;
    assert!(joined
        .iter()
        .any(|m| matches!(m, ServerMessage::JoinedRoom(j) if j.room_id == ROOM)));
    Ok(())
}

#[tokio::test]
async fn test_request_for_another_room_is_rejected() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut alice = sfu.connect();
    alice.join(ROOM, "alice", "Alice").await;
    let mut bob = sfu.connect();
    bob.join("elsewhere", "bob", "Bob").await;

    alice
        .send(
            "create-transport",
            json!({ "roomId": "elsewhere", "userId": "alice", "direction": "send" }),
        )
        .await;
    alice
        .send(
            "get-participants",
            json!({ "roomId": "elsewhere" }),
        )
        .await;

    let errors = error_messages(&alice.drain());
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| e == "Connection has not joined a room"));
    assert_eq!(
        sfu.registry().get_room("elsewhere").await?.unwrap().transport_count,
        0
    );
    Ok(())
}

// ============================================================================
// Duplicate joins
// ============================================================================

#[tokio::test]
async fn test_duplicate_join_replaces_old_connection() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::start().await?;
    let mut old = sfu.connect();
    old.join(ROOM, "alice", "Alice").await;
    let mut new = sfu.connect();

    let joined = new.join(ROOM, "alice", "Alice").await;
    assert!(joined
        .iter()
        .any(|m| matches!(m, ServerMessage::JoinedRoom(_))));
    assert!(error_messages(&old.drain())
        .iter()
        .any(|e| e == SESSION_REPLACED_MESSAGE));

    new.open_transport(ROOM, "alice", TransportDirection::Send)
        .await?;

    // The stale connection can neither create transports nor remove the peer.
    old.send(
        "create-transport",
        json!({ "roomId": ROOM, "userId": "alice", "direction": "send" }),
    )
    .await;
    assert!(!error_messages(&old.drain()).is_empty());
    old.close().await;

    let room = sfu.registry().get_room(ROOM).await?.unwrap();
    assert_eq!(room.peers.len(), 1);
    assert_eq!(room.transport_count, 1);
    new.publish(ROOM, "alice", MediaKind::Video).await?;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_join_rejected_under_reject_policy() -> Result<(), anyhow::Error> {
    let sfu = TestSfu::builder()
        .duplicate_join_policy(DuplicateJoinPolicy::Reject)
        .build()
        .await?;
    let mut first = sfu.connect();
    first.join(ROOM, "alice", "Alice").await;
    let mut second = sfu.connect();

    let replies = second.join(ROOM, "alice", "Alice").await;

    let errors = error_messages(&replies);
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().all(|e| e.starts_with("Peer already joined")));
    assert_eq!(second.session(), None);
    assert!(error_messages(&first.drain()).is_empty());
    Ok(())
}
