//! Message types for the room registry actor.
//!
//! Requests carry a `oneshot` sender for the reply; notifications that the
//! caller does not wait on (producer closed by the engine, recording
//! finished, broadcasts) have none.

use crate::errors::SfuError;
use crate::media::engine::{Consumer, Producer, WebRtcTransport};
use crate::media::room::MediaRoomSlot;
use crate::recording::RecordingHandle;
use crate::signaling::protocol::{ProducerAnnouncement, ServerMessage};
use common::types::{PeerInfo, TransportDirection};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Identifies a peer as seen by one signaling connection.
///
/// Mutations are accepted only while `connection_id` still owns the
/// `(room_id, user_id)` entry, so a connection displaced by a duplicate join
/// cannot touch its successor's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub room_id: String,
    pub user_id: String,
    pub connection_id: String,
}

/// Messages queued for one connection before new ones are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Queue feeding one connection's socket writer.
#[must_use]
pub fn outbound_channel() -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}

/// Outbound side of a connection.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    pub connection_id: String,
    pub sender: mpsc::Sender<ServerMessage>,
}

impl PeerChannel {
    /// Queue `message` without waiting. A closed connection drops it, and so
    /// does a reader that has fallen `OUTBOUND_QUEUE_CAPACITY` messages behind.
    pub fn send(&self, message: ServerMessage) {
        match self.sender.try_send(message) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "sfu.signaling",
                    connection_id = %self.connection_id,
                    capacity = OUTBOUND_QUEUE_CAPACITY,
                    "Outbound queue full, dropping message"
                );
            }
        }
    }
}

/// Arguments of `add_peer`.
#[derive(Debug)]
pub struct NewPeer {
    pub room_id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub channel: PeerChannel,
}

/// Result of `add_peer`.
pub struct AddedPeer {
    pub media: Arc<MediaRoomSlot>,
    /// An earlier session for the same user was displaced.
    pub replaced: bool,
}

/// Result of `remove_peer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedPeer {
    pub user_id: String,
    pub name: String,
    pub email: String,
    /// The peer was the last one and the room is gone.
    pub room_closed: bool,
}

/// A producer together with its owner.
#[derive(Clone)]
pub struct ProducerEntry {
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub producer: Arc<dyn Producer>,
}

impl ProducerEntry {
    #[must_use]
    pub fn to_announcement(&self) -> ProducerAnnouncement {
        ProducerAnnouncement {
            producer_id: self.producer.id().to_string(),
            kind: self.producer.kind(),
            user_id: self.user_id.clone(),
            producer_name: self.user_name.clone(),
            producer_email: self.user_email.clone(),
        }
    }
}

/// Recording state of a room as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRecordingStatus {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Read-only view of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    /// In join order.
    pub peers: Vec<PeerInfo>,
    pub producer_count: usize,
    pub consumer_count: usize,
    pub transport_count: usize,
    pub recording: RoomRecordingStatus,
}

/// Registry-wide counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub peers: usize,
    pub producers: usize,
}

/// Messages sent to `RoomRegistryActor`.
pub enum RegistryMessage {
    /// Register a peer, creating the room if needed.
    AddPeer {
        peer: NewPeer,
        respond_to: oneshot::Sender<Result<AddedPeer, SfuError>>,
    },

    /// Remove a peer and cascade-close its media. `None` if the key no
    /// longer owns an entry.
    RemovePeer {
        key: PeerKey,
        respond_to: oneshot::Sender<Option<RemovedPeer>>,
    },

    /// Peers of a room in join order (empty for an unknown room).
    ListPeers {
        room_id: String,
        respond_to: oneshot::Sender<Vec<PeerInfo>>,
    },

    GetPeer {
        room_id: String,
        user_id: String,
        respond_to: oneshot::Sender<Option<PeerInfo>>,
    },

    /// Outbound channel of a user, wherever they are.
    GetChannel {
        user_id: String,
        respond_to: oneshot::Sender<Option<PeerChannel>>,
    },

    /// The room's lazily-created media context.
    MediaSlot {
        room_id: String,
        respond_to: oneshot::Sender<Result<Arc<MediaRoomSlot>, SfuError>>,
    },

    /// Confirm the key still owns its peer entry.
    CheckPeer {
        key: PeerKey,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    AddTransport {
        key: PeerKey,
        direction: TransportDirection,
        transport: Arc<dyn WebRtcTransport>,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    GetTransport {
        key: PeerKey,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<Arc<dyn WebRtcTransport>, SfuError>>,
    },

    /// Record a producer and announce it to the rest of the room.
    AddProducer {
        key: PeerKey,
        producer: Arc<dyn Producer>,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    /// Global producer lookup.
    GetProducer {
        producer_id: String,
        respond_to: oneshot::Sender<Option<ProducerEntry>>,
    },

    /// Producers of a room ordered by owner join order, then creation.
    ListProducers {
        room_id: String,
        except_user_id: Option<String>,
        respond_to: oneshot::Sender<Vec<ProducerEntry>>,
    },

    AddConsumer {
        key: PeerKey,
        consumer: Arc<dyn Consumer>,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    /// Owner-initiated producer close.
    CloseProducer {
        key: PeerKey,
        producer_id: String,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    /// The engine closed a producer (transport or router went away).
    ProducerClosed { producer_id: String },

    /// Deliver `message` to every peer of the room except `except_user_id`.
    Broadcast {
        room_id: String,
        message: ServerMessage,
        except_user_id: Option<String>,
    },

    /// Claim the room's recording slot (`Idle` to `Starting`).
    ReserveRecording {
        room_id: String,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    /// Install the launched session (`Starting` to `Active`).
    ActivateRecording {
        room_id: String,
        handle: RecordingHandle,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    /// Give the slot back after a failed launch (`Starting` to `Idle`).
    ReleaseRecording { room_id: String },

    /// Stop the active session. Replies whether one was active.
    StopRecording {
        room_id: String,
        respond_to: oneshot::Sender<Result<bool, SfuError>>,
    },

    /// A session's transcoder exited.
    RecordingFinished { room_id: String, session_id: String },

    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomSnapshot>>,
    },

    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },
}

impl RegistryMessage {
    /// Variant name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RegistryMessage::AddPeer { .. } => "add_peer",
            RegistryMessage::RemovePeer { .. } => "remove_peer",
            RegistryMessage::ListPeers { .. } => "list_peers",
            RegistryMessage::GetPeer { .. } => "get_peer",
            RegistryMessage::GetChannel { .. } => "get_channel",
            RegistryMessage::MediaSlot { .. } => "media_slot",
            RegistryMessage::AddTransport { .. } => "add_transport",
            RegistryMessage::CheckPeer { .. } => "check_peer",
            RegistryMessage::GetTransport { .. } => "get_transport",
            RegistryMessage::AddProducer { .. } => "add_producer",
            RegistryMessage::GetProducer { .. } => "get_producer",
            RegistryMessage::ListProducers { .. } => "list_producers",
            RegistryMessage::AddConsumer { .. } => "add_consumer",
            RegistryMessage::CloseProducer { .. } => "close_producer",
            RegistryMessage::ProducerClosed { .. } => "producer_closed",
            RegistryMessage::Broadcast { .. } => "broadcast",
            RegistryMessage::ReserveRecording { .. } => "reserve_recording",
            RegistryMessage::ActivateRecording { .. } => "activate_recording",
            RegistryMessage::ReleaseRecording { .. } => "release_recording",
            RegistryMessage::StopRecording { .. } => "stop_recording",
            RegistryMessage::RecordingFinished { .. } => "recording_finished",
            RegistryMessage::GetRoom { .. } => "get_room",
            RegistryMessage::Stats { .. } => "stats",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signaling::protocol::RecordingStopped;

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (sender, mut receiver) = mpsc::channel(2);
        let channel = PeerChannel {
            connection_id: "c1".to_string(),
            sender,
        };

        for _ in 0..3 {
            channel.send(ServerMessage::RecordingStopped(RecordingStopped {}));
        }

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());

        // Room frees up once the reader catches up.
        channel.send(ServerMessage::RecordingStopped(RecordingStopped {}));
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_closed_connection_is_ignored() {
        let (sender, receiver) = outbound_channel();
        drop(receiver);
        let channel = PeerChannel {
            connection_id: "c1".to_string(),
            sender,
        };
        channel.send(ServerMessage::RecordingStopped(RecordingStopped {}));
    }
}
