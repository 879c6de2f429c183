//! `RoomRegistryActor` - single owner of every room, peer and media handle.
//!
//! Signaling connections never touch room state directly; they send
//! [`RegistryMessage`]s through a [`RoomRegistryHandle`]. Engine calls that
//! need to await (creating transports, producing, consuming) run in the
//! connection task; the actor only stores the resulting handles, closes them
//! (synchronous, idempotent) and fans out notifications.
//!
//! # Producer close
//!
//! Every way a producer can go away (owner request, peer removal, the engine
//! closing its transport) ends in one place that first removes the producer
//! from the index. Whoever removes it broadcasts `producer-closed`; later
//! notifications for the same id find nothing and do nothing.
//!
//! # Peer removal
//!
//! Producers close first (through the path above), then consumers, then
//! transports. The peer is dropped and `peer-left` is sent to the rest. When
//! the last peer leaves the room's media context is retired, any active
//! recording is stopped and the room is forgotten.

use super::messages::{
    AddedPeer, NewPeer, PeerChannel, PeerKey, ProducerEntry, RegistryMessage, RegistryStats,
    RemovedPeer, RoomRecordingStatus, RoomSnapshot,
};
use super::metrics::MailboxMonitor;
use crate::config::DuplicateJoinPolicy;
use crate::errors::SfuError;
use crate::media::engine::{Consumer, Producer, Transport, WebRtcTransport};
use crate::media::room::MediaRoomSlot;
use crate::observability::metrics;
use crate::recording::RecordingHandle;
use crate::signaling::protocol::{
    ErrorPayload, PeerLeft, ProducerAnnouncement, ProducerClosed, RecordingStopped, ServerMessage,
};
use common::types::{PeerInfo, TransportDirection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Registry mailbox size.
const REGISTRY_CHANNEL_BUFFER: usize = 1024;

/// Sent to a connection displaced by a newer join for the same user.
pub const SESSION_REPLACED_MESSAGE: &str = "Session replaced by a new connection";

/// Handle to the `RoomRegistryActor`.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, SfuError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))
    }

    async fn notify(&self, message: RegistryMessage) -> Result<(), SfuError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))
    }

    /// Register a peer, creating the room on first join.
    ///
    /// A collision on `(room_id, user_id)` from another connection follows the
    /// configured [`DuplicateJoinPolicy`]. The same connection joining again
    /// only refreshes the peer's details.
    pub async fn add_peer(&self, peer: NewPeer) -> Result<AddedPeer, SfuError> {
        self.request(|respond_to| RegistryMessage::AddPeer { peer, respond_to })
            .await?
    }

    /// Remove a peer with full cascade. Returns `None` when `key` no longer
    /// owns an entry, so repeated calls are harmless.
    pub async fn remove_peer(&self, key: PeerKey) -> Result<Option<RemovedPeer>, SfuError> {
        self.request(|respond_to| RegistryMessage::RemovePeer { key, respond_to })
            .await
    }

    pub async fn list_peers(&self, room_id: &str) -> Result<Vec<PeerInfo>, SfuError> {
        self.request(|respond_to| RegistryMessage::ListPeers {
            room_id: room_id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn get_peer(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<PeerInfo>, SfuError> {
        self.request(|respond_to| RegistryMessage::GetPeer {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn get_channel(&self, user_id: &str) -> Result<Option<PeerChannel>, SfuError> {
        self.request(|respond_to| RegistryMessage::GetChannel {
            user_id: user_id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn media_slot(&self, room_id: &str) -> Result<Arc<MediaRoomSlot>, SfuError> {
        self.request(|respond_to| RegistryMessage::MediaSlot {
            room_id: room_id.to_string(),
            respond_to,
        })
        .await?
    }

    /// `NotJoined` once another connection has taken over the key's peer.
    pub async fn check_peer(&self, key: PeerKey) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::CheckPeer { key, respond_to })
            .await?
    }

    /// Record the peer's transport for `direction`. If the peer is gone the
    /// transport is closed and an error returned.
    pub async fn add_transport(
        &self,
        key: PeerKey,
        direction: TransportDirection,
        transport: Arc<dyn WebRtcTransport>,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::AddTransport {
            key,
            direction,
            transport,
            respond_to,
        })
        .await?
    }

    pub async fn get_transport(
        &self,
        key: PeerKey,
        direction: TransportDirection,
    ) -> Result<Arc<dyn WebRtcTransport>, SfuError> {
        self.request(|respond_to| RegistryMessage::GetTransport {
            key,
            direction,
            respond_to,
        })
        .await?
    }

    /// Record a producer, announce it to the room and watch for the engine
    /// closing it.
    pub async fn add_producer(
        &self,
        key: PeerKey,
        producer: Arc<dyn Producer>,
    ) -> Result<(), SfuError> {
        let closed = producer.closed_token();
        let producer_id = producer.id().to_string();
        self.request(|respond_to| RegistryMessage::AddProducer {
            key,
            producer,
            respond_to,
        })
        .await??;

        let registry = self.clone();
        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = closed.cancelled() => {
                    let _ = registry.producer_closed(producer_id).await;
                }
                () = cancel.cancelled() => {}
            }
        });
        Ok(())
    }

    pub async fn get_producer(&self, producer_id: &str) -> Result<Option<ProducerEntry>, SfuError> {
        self.request(|respond_to| RegistryMessage::GetProducer {
            producer_id: producer_id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn list_producers(
        &self,
        room_id: &str,
        except_user_id: Option<&str>,
    ) -> Result<Vec<ProducerEntry>, SfuError> {
        self.request(|respond_to| RegistryMessage::ListProducers {
            room_id: room_id.to_string(),
            except_user_id: except_user_id.map(str::to_string),
            respond_to,
        })
        .await
    }

    pub async fn add_consumer(
        &self,
        key: PeerKey,
        consumer: Arc<dyn Consumer>,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::AddConsumer {
            key,
            consumer,
            respond_to,
        })
        .await?
    }

    /// Owner-only close. Broadcasts `producer-closed` to the rest of the room.
    pub async fn close_producer(&self, key: PeerKey, producer_id: &str) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::CloseProducer {
            key,
            producer_id: producer_id.to_string(),
            respond_to,
        })
        .await?
    }

    /// Report a producer the engine closed on its own.
    pub async fn producer_closed(&self, producer_id: String) -> Result<(), SfuError> {
        self.notify(RegistryMessage::ProducerClosed { producer_id })
            .await
    }

    pub async fn broadcast(
        &self,
        room_id: &str,
        message: ServerMessage,
        except_user_id: Option<&str>,
    ) -> Result<(), SfuError> {
        self.notify(RegistryMessage::Broadcast {
            room_id: room_id.to_string(),
            message,
            except_user_id: except_user_id.map(str::to_string),
        })
        .await
    }

    /// Claim the room's recording slot.
    ///
    /// # Errors
    ///
    /// `RecordingInProgress` if a session is starting, active or stopping.
    pub async fn reserve_recording(&self, room_id: &str) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::ReserveRecording {
            room_id: room_id.to_string(),
            respond_to,
        })
        .await?
    }

    /// Install a launched session in a reserved slot. On error the caller
    /// owns `handle` and must stop it.
    pub async fn activate_recording(
        &self,
        room_id: &str,
        handle: RecordingHandle,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::ActivateRecording {
            room_id: room_id.to_string(),
            handle,
            respond_to,
        })
        .await?
    }

    pub async fn release_recording(&self, room_id: &str) -> Result<(), SfuError> {
        self.notify(RegistryMessage::ReleaseRecording {
            room_id: room_id.to_string(),
        })
        .await
    }

    /// Stop the active session and broadcast `recording-stopped`. Returns
    /// `false` when nothing was active.
    pub async fn stop_recording(&self, room_id: &str) -> Result<bool, SfuError> {
        self.request(|respond_to| RegistryMessage::StopRecording {
            room_id: room_id.to_string(),
            respond_to,
        })
        .await?
    }

    pub async fn recording_finished(
        &self,
        room_id: &str,
        session_id: &str,
    ) -> Result<(), SfuError> {
        self.notify(RegistryMessage::RecordingFinished {
            room_id: room_id.to_string(),
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Option<RoomSnapshot>, SfuError> {
        self.request(|respond_to| RegistryMessage::GetRoom {
            room_id: room_id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn stats(&self) -> Result<RegistryStats, SfuError> {
        self.request(|respond_to| RegistryMessage::Stats { respond_to })
            .await
    }

    /// Cancel the registry actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Per-peer state.
struct PeerEntry {
    connection_id: String,
    name: String,
    email: String,
    channel: PeerChannel,
    /// Global join counter; orders peers within a room.
    joined_seq: u64,
    transports: HashMap<TransportDirection, Arc<dyn WebRtcTransport>>,
    /// In creation order.
    producers: Vec<Arc<dyn Producer>>,
    consumers: HashMap<String, Arc<dyn Consumer>>,
}

impl PeerEntry {
    fn info(&self, user_id: &str) -> PeerInfo {
        PeerInfo {
            user_id: user_id.to_string(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    /// Close every handle without notifying anyone.
    fn close_all(&mut self) {
        for producer in self.producers.drain(..) {
            producer.close();
        }
        for (_, consumer) in self.consumers.drain() {
            consumer.close();
        }
        for (_, transport) in self.transports.drain() {
            transport.close();
        }
    }
}

enum RecordingSlot {
    Idle,
    Starting,
    Active(RecordingHandle),
    /// Stop signalled; waiting for the session to exit.
    Stopping(RecordingHandle),
}

impl RecordingSlot {
    fn status(&self) -> RoomRecordingStatus {
        match self {
            RecordingSlot::Idle => RoomRecordingStatus::Idle,
            RecordingSlot::Starting => RoomRecordingStatus::Starting,
            RecordingSlot::Active(_) => RoomRecordingStatus::Active,
            RecordingSlot::Stopping(_) => RoomRecordingStatus::Stopping,
        }
    }
}

struct Room {
    peers: HashMap<String, PeerEntry>,
    media: Arc<MediaRoomSlot>,
    recording: RecordingSlot,
}

impl Room {
    fn new(room_id: &str) -> Self {
        Self {
            peers: HashMap::new(),
            media: Arc::new(MediaRoomSlot::new(room_id)),
            recording: RecordingSlot::Idle,
        }
    }

    fn peers_in_join_order(&self) -> Vec<(&String, &PeerEntry)> {
        let mut peers: Vec<_> = self.peers.iter().collect();
        peers.sort_by_key(|(_, peer)| peer.joined_seq);
        peers
    }

    fn broadcast(&self, message: &ServerMessage, except_user_id: Option<&str>) {
        for (user_id, peer) in &self.peers {
            if Some(user_id.as_str()) != except_user_id {
                peer.channel.send(message.clone());
            }
        }
    }

    /// The peer `key` refers to, if `key`'s connection still owns it.
    fn owned_peer_mut(&mut self, key: &PeerKey) -> Result<&mut PeerEntry, SfuError> {
        let peer = self
            .peers
            .get_mut(&key.user_id)
            .ok_or_else(|| SfuError::PeerNotFound(key.user_id.clone()))?;
        if peer.connection_id != key.connection_id {
            return Err(SfuError::NotJoined);
        }
        Ok(peer)
    }
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    duplicate_join_policy: DuplicateJoinPolicy,
    rooms: HashMap<String, Room>,
    /// producer id -> (room id, user id)
    producer_index: HashMap<String, (String, String)>,
    /// user id -> room id
    user_index: HashMap<String, String>,
    next_join_seq: u64,
    /// Sessions of closed rooms that may still be finalizing.
    closed_recordings: Vec<RecordingHandle>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle. The task resolves to the
    /// recording sessions that were still finalizing when the actor stopped.
    pub fn spawn(
        duplicate_join_policy: DuplicateJoinPolicy,
        cancel_token: CancellationToken,
    ) -> (RoomRegistryHandle, JoinHandle<Vec<RecordingHandle>>) {
        let (handle, actor) = Self::new(duplicate_join_policy, cancel_token);
        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    fn new(
        duplicate_join_policy: DuplicateJoinPolicy,
        cancel_token: CancellationToken,
    ) -> (RoomRegistryHandle, Self) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            duplicate_join_policy,
            rooms: HashMap::new(),
            producer_index: HashMap::new(),
            user_index: HashMap::new(),
            next_join_seq: 0,
            closed_recordings: Vec::new(),
            mailbox: MailboxMonitor::new("registry"),
        };
        (
            RoomRegistryHandle {
                sender,
                cancel_token,
            },
            actor,
        )
    }

    #[instrument(skip_all, name = "sfu.actor.registry")]
    async fn run(mut self) -> Vec<RecordingHandle> {
        info!(
            target: "sfu.actor.registry",
            duplicate_join_policy = %self.duplicate_join_policy,
            "RoomRegistryActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sfu.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.process(message),
                        None => {
                            info!(
                                target: "sfu.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        let pending_recordings = self.shutdown();
        info!(
            target: "sfu.actor.registry",
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomRegistryActor stopped"
        );
        pending_recordings
    }

    fn process(&mut self, message: RegistryMessage) {
        self.mailbox.record_received(self.receiver.len());
        self.handle_message(message);
        self.update_gauges();
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        debug!(target: "sfu.actor.registry", message = message.name(), "Handling message");
        match message {
            RegistryMessage::AddPeer { peer, respond_to } => {
                let _ = respond_to.send(self.add_peer(peer));
            }
            RegistryMessage::RemovePeer { key, respond_to } => {
                let result = self.remove_owned_peer(&key);
                let _ = respond_to.send(result);
            }
            RegistryMessage::ListPeers {
                room_id,
                respond_to,
            } => {
                let peers = self
                    .rooms
                    .get(&room_id)
                    .map(|room| {
                        room.peers_in_join_order()
                            .into_iter()
                            .map(|(user_id, peer)| peer.info(user_id))
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = respond_to.send(peers);
            }
            RegistryMessage::GetPeer {
                room_id,
                user_id,
                respond_to,
            } => {
                let peer = self
                    .rooms
                    .get(&room_id)
                    .and_then(|room| room.peers.get(&user_id))
                    .map(|peer| peer.info(&user_id));
                let _ = respond_to.send(peer);
            }
            RegistryMessage::GetChannel {
                user_id,
                respond_to,
            } => {
                let channel = self
                    .user_index
                    .get(&user_id)
                    .and_then(|room_id| self.rooms.get(room_id))
                    .and_then(|room| room.peers.get(&user_id))
                    .map(|peer| peer.channel.clone());
                let _ = respond_to.send(channel);
            }
            RegistryMessage::MediaSlot {
                room_id,
                respond_to,
            } => {
                let slot = self
                    .rooms
                    .get(&room_id)
                    .map(|room| Arc::clone(&room.media))
                    .ok_or(SfuError::RoomNotFound(room_id));
                let _ = respond_to.send(slot);
            }
            RegistryMessage::AddTransport {
                key,
                direction,
                transport,
                respond_to,
            } => {
                let _ = respond_to.send(self.add_transport(&key, direction, transport));
            }
            RegistryMessage::CheckPeer { key, respond_to } => {
                let result = self
                    .room_mut(&key.room_id)
                    .and_then(|room| room.owned_peer_mut(&key).map(|_| ()));
                let _ = respond_to.send(result);
            }
            RegistryMessage::GetTransport {
                key,
                direction,
                respond_to,
            } => {
                let result = self.room_mut(&key.room_id).and_then(|room| {
                    room.owned_peer_mut(&key)?
                        .transports
                        .get(&direction)
                        .cloned()
                        .ok_or_else(|| {
                            SfuError::TransportNotFound(format!(
                                "{direction} transport for {}",
                                key.user_id
                            ))
                        })
                });
                let _ = respond_to.send(result);
            }
            RegistryMessage::AddProducer {
                key,
                producer,
                respond_to,
            } => {
                let _ = respond_to.send(self.add_producer(&key, producer));
            }
            RegistryMessage::GetProducer {
                producer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_producer(&producer_id));
            }
            RegistryMessage::ListProducers {
                room_id,
                except_user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_producers(&room_id, except_user_id.as_deref()));
            }
            RegistryMessage::AddConsumer {
                key,
                consumer,
                respond_to,
            } => {
                let _ = respond_to.send(self.add_consumer(&key, consumer));
            }
            RegistryMessage::CloseProducer {
                key,
                producer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.close_owned_producer(&key, &producer_id));
            }
            RegistryMessage::ProducerClosed { producer_id } => {
                if self.close_producer(&producer_id) {
                    debug!(
                        target: "sfu.actor.registry",
                        producer_id = %producer_id,
                        "Producer closed by engine"
                    );
                }
            }
            RegistryMessage::Broadcast {
                room_id,
                message,
                except_user_id,
            } => {
                if let Some(room) = self.rooms.get(&room_id) {
                    room.broadcast(&message, except_user_id.as_deref());
                }
            }
            RegistryMessage::ReserveRecording {
                room_id,
                respond_to,
            } => {
                let result = self.room_mut(&room_id).and_then(|room| {
                    if matches!(room.recording, RecordingSlot::Idle) {
                        room.recording = RecordingSlot::Starting;
                        Ok(())
                    } else {
                        Err(SfuError::RecordingInProgress(room_id.clone()))
                    }
                });
                let _ = respond_to.send(result);
            }
            RegistryMessage::ActivateRecording {
                room_id,
                handle,
                respond_to,
            } => {
                let result = self.room_mut(&room_id).and_then(|room| {
                    if matches!(room.recording, RecordingSlot::Starting) {
                        info!(
                            target: "sfu.actor.registry",
                            room_id = %room_id,
                            session_id = %handle.session_id(),
                            "Recording active"
                        );
                        room.recording = RecordingSlot::Active(handle);
                        Ok(())
                    } else {
                        Err(SfuError::Internal(format!(
                            "recording slot for {room_id} was not reserved"
                        )))
                    }
                });
                let _ = respond_to.send(result);
            }
            RegistryMessage::ReleaseRecording { room_id } => {
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    if matches!(room.recording, RecordingSlot::Starting) {
                        room.recording = RecordingSlot::Idle;
                    }
                }
            }
            RegistryMessage::StopRecording {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(Ok(self.stop_recording(&room_id)));
            }
            RegistryMessage::RecordingFinished {
                room_id,
                session_id,
            } => {
                self.recording_finished(&room_id, &session_id);
            }
            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let snapshot = self.rooms.get(&room_id).map(|room| snapshot(&room_id, room));
                let _ = respond_to.send(snapshot);
            }
            RegistryMessage::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    fn room_mut(&mut self, room_id: &str) -> Result<&mut Room, SfuError> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| SfuError::RoomNotFound(room_id.to_string()))
    }

    fn add_peer(&mut self, peer: NewPeer) -> Result<AddedPeer, SfuError> {
        let NewPeer {
            room_id,
            user_id,
            name,
            email,
            channel,
        } = peer;

        let existing_connection = self
            .rooms
            .get(&room_id)
            .and_then(|room| room.peers.get(&user_id))
            .map(|entry| entry.connection_id.clone());

        let mut replaced = false;
        let mut inherited: Option<PeerEntry> = None;

        if let Some(existing_connection) = existing_connection {
            if existing_connection == channel.connection_id {
                let room = self.room_mut(&room_id)?;
                if let Some(entry) = room.peers.get_mut(&user_id) {
                    entry.name = name;
                    entry.email = email;
                    entry.channel = channel;
                }
                return Ok(AddedPeer {
                    media: Arc::clone(&room.media),
                    replaced: false,
                });
            }

            match self.duplicate_join_policy {
                DuplicateJoinPolicy::Reject => {
                    return Err(SfuError::DuplicatePeer(format!(
                        "{user_id} is already in room {room_id}"
                    )));
                }
                DuplicateJoinPolicy::Replace => {
                    if let Some(old) = self
                        .rooms
                        .get(&room_id)
                        .and_then(|room| room.peers.get(&user_id))
                    {
                        old.channel.send(ServerMessage::Error(ErrorPayload {
                            message: SESSION_REPLACED_MESSAGE.to_string(),
                        }));
                    }
                    self.remove_peer_entry(&room_id, &user_id, true);
                    replaced = true;
                }
                DuplicateJoinPolicy::Overwrite => {
                    inherited = self
                        .rooms
                        .get_mut(&room_id)
                        .and_then(|room| room.peers.remove(&user_id));
                    replaced = true;
                }
            }
            info!(
                target: "sfu.actor.registry",
                room_id = %room_id,
                user_id = %user_id,
                policy = %self.duplicate_join_policy,
                "Displaced existing session"
            );
        }

        let joined_seq = match &inherited {
            Some(old) => old.joined_seq,
            None => {
                self.next_join_seq += 1;
                self.next_join_seq
            }
        };
        let entry = match inherited {
            Some(old) => PeerEntry {
                connection_id: channel.connection_id.clone(),
                name,
                email,
                channel,
                joined_seq,
                ..old
            },
            None => PeerEntry {
                connection_id: channel.connection_id.clone(),
                name,
                email,
                channel,
                joined_seq,
                transports: HashMap::new(),
                producers: Vec::new(),
                consumers: HashMap::new(),
            },
        };

        let created = !self.rooms.contains_key(&room_id);
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(&room_id));
        room.peers.insert(user_id.clone(), entry);
        let media = Arc::clone(&room.media);
        let peer_count = room.peers.len();
        self.user_index.insert(user_id.clone(), room_id.clone());

        if created {
            info!(target: "sfu.actor.registry", room_id = %room_id, "Room created");
        }
        info!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            user_id = %user_id,
            peers = peer_count,
            "Peer joined"
        );

        Ok(AddedPeer { media, replaced })
    }

    fn remove_owned_peer(&mut self, key: &PeerKey) -> Option<RemovedPeer> {
        let owns = self
            .rooms
            .get(&key.room_id)
            .and_then(|room| room.peers.get(&key.user_id))
            .is_some_and(|peer| peer.connection_id == key.connection_id);
        if !owns {
            return None;
        }
        self.remove_peer_entry(&key.room_id, &key.user_id, false)
    }

    /// Cascade-remove a peer. With `keep_empty_room` the room survives even if
    /// this was its last peer (a replacement is about to join).
    fn remove_peer_entry(
        &mut self,
        room_id: &str,
        user_id: &str,
        keep_empty_room: bool,
    ) -> Option<RemovedPeer> {
        let producer_ids: Vec<String> = self
            .rooms
            .get(room_id)?
            .peers
            .get(user_id)?
            .producers
            .iter()
            .map(|producer| producer.id().to_string())
            .collect();
        for producer_id in &producer_ids {
            self.close_producer(producer_id);
        }

        let room = self.rooms.get_mut(room_id)?;
        let mut entry = room.peers.remove(user_id)?;
        entry.close_all();
        if let Some(media) = room.media.get() {
            media.remove_peer_transports(user_id);
        }
        room.broadcast(
            &ServerMessage::PeerLeft(PeerLeft {
                user_id: user_id.to_string(),
            }),
            None,
        );
        let room_empty = room.peers.is_empty();

        if self.user_index.get(user_id).map(String::as_str) == Some(room_id) {
            self.user_index.remove(user_id);
        }

        info!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            user_id = %user_id,
            producers_closed = producer_ids.len(),
            "Peer left"
        );

        let room_closed = room_empty && !keep_empty_room;
        if room_closed {
            self.close_room(room_id);
        }

        Some(RemovedPeer {
            user_id: user_id.to_string(),
            name: entry.name,
            email: entry.email,
            room_closed,
        })
    }

    fn close_room(&mut self, room_id: &str) {
        let Some(mut room) = self.rooms.remove(room_id) else {
            return;
        };
        for (_, mut peer) in room.peers.drain() {
            for producer in &peer.producers {
                self.producer_index.remove(producer.id());
            }
            peer.close_all();
        }
        if let RecordingSlot::Active(handle) | RecordingSlot::Stopping(handle) =
            std::mem::replace(&mut room.recording, RecordingSlot::Idle)
        {
            info!(
                target: "sfu.actor.registry",
                room_id = %room_id,
                session_id = %handle.session_id(),
                "Stopping recording of closed room"
            );
            handle.stop();
            self.closed_recordings.retain(|h| !h.is_finished());
            self.closed_recordings.push(handle);
        }
        room.media.retire();
        info!(target: "sfu.actor.registry", room_id = %room_id, "Room closed");
    }

    fn add_transport(
        &mut self,
        key: &PeerKey,
        direction: TransportDirection,
        transport: Arc<dyn WebRtcTransport>,
    ) -> Result<(), SfuError> {
        let peer = match self
            .room_mut(&key.room_id)
            .and_then(|room| room.owned_peer_mut(key))
        {
            Ok(peer) => peer,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        if let Some(old) = peer.transports.insert(direction, Arc::clone(&transport)) {
            if old.id() != transport.id() {
                old.close();
            }
        }
        debug!(
            target: "sfu.actor.registry",
            room_id = %key.room_id,
            user_id = %key.user_id,
            direction = %direction,
            transport_id = %transport.id(),
            "Transport registered"
        );
        Ok(())
    }

    fn add_producer(&mut self, key: &PeerKey, producer: Arc<dyn Producer>) -> Result<(), SfuError> {
        let room = match self.room_mut(&key.room_id) {
            Ok(room) => room,
            Err(e) => {
                producer.close();
                return Err(e);
            }
        };
        let announcement = match room.owned_peer_mut(key) {
            Ok(peer) => {
                peer.producers.push(Arc::clone(&producer));
                ProducerAnnouncement {
                    producer_id: producer.id().to_string(),
                    kind: producer.kind(),
                    user_id: key.user_id.clone(),
                    producer_name: peer.name.clone(),
                    producer_email: peer.email.clone(),
                }
            }
            Err(e) => {
                producer.close();
                return Err(e);
            }
        };
        room.broadcast(
            &ServerMessage::NewProducer(announcement),
            Some(&key.user_id),
        );
        self.producer_index.insert(
            producer.id().to_string(),
            (key.room_id.clone(), key.user_id.clone()),
        );
        debug!(
            target: "sfu.actor.registry",
            room_id = %key.room_id,
            user_id = %key.user_id,
            producer_id = %producer.id(),
            kind = %producer.kind(),
            "Producer registered"
        );
        Ok(())
    }

    fn get_producer(&self, producer_id: &str) -> Option<ProducerEntry> {
        let (room_id, user_id) = self.producer_index.get(producer_id)?;
        let peer = self.rooms.get(room_id)?.peers.get(user_id)?;
        let producer = peer.producers.iter().find(|p| p.id() == producer_id)?;
        Some(ProducerEntry {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            user_name: peer.name.clone(),
            user_email: peer.email.clone(),
            producer: Arc::clone(producer),
        })
    }

    fn list_producers(&self, room_id: &str, except_user_id: Option<&str>) -> Vec<ProducerEntry> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.peers_in_join_order()
            .into_iter()
            .filter(|(user_id, _)| Some(user_id.as_str()) != except_user_id)
            .flat_map(|(user_id, peer)| {
                peer.producers.iter().map(move |producer| ProducerEntry {
                    room_id: room_id.to_string(),
                    user_id: user_id.clone(),
                    user_name: peer.name.clone(),
                    user_email: peer.email.clone(),
                    producer: Arc::clone(producer),
                })
            })
            .collect()
    }

    fn add_consumer(&mut self, key: &PeerKey, consumer: Arc<dyn Consumer>) -> Result<(), SfuError> {
        let producer_live = self.producer_index.contains_key(consumer.producer_id());
        let result = self
            .room_mut(&key.room_id)
            .and_then(|room| room.owned_peer_mut(key))
            .and_then(|peer| {
                if !producer_live || consumer.is_closed() {
                    return Err(SfuError::ProducerNotFound(consumer.producer_id().to_string()));
                }
                peer.consumers
                    .insert(consumer.id().to_string(), Arc::clone(&consumer));
                Ok(())
            });
        if result.is_err() {
            consumer.close();
        }
        result
    }

    fn close_owned_producer(&mut self, key: &PeerKey, producer_id: &str) -> Result<(), SfuError> {
        self.room_mut(&key.room_id)?.owned_peer_mut(key)?;
        match self.producer_index.get(producer_id).cloned() {
            Some((room_id, _)) if room_id != key.room_id => {
                Err(SfuError::ProducerNotFound(producer_id.to_string()))
            }
            Some((_, owner)) if owner != key.user_id => Err(SfuError::PermissionDenied(
                format!("{} does not own producer {producer_id}", key.user_id),
            )),
            Some(_) => {
                self.close_producer(producer_id);
                Ok(())
            }
            None => Err(SfuError::ProducerNotFound(producer_id.to_string())),
        }
    }

    /// The single producer-close path. Returns whether this call closed it.
    fn close_producer(&mut self, producer_id: &str) -> bool {
        let Some((room_id, user_id)) = self.producer_index.remove(producer_id) else {
            return false;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        let producer = room.peers.get_mut(&user_id).and_then(|peer| {
            let position = peer.producers.iter().position(|p| p.id() == producer_id)?;
            Some(peer.producers.remove(position))
        });
        let Some(producer) = producer else {
            return false;
        };
        producer.close();

        let mut consumers_closed = 0usize;
        for peer in room.peers.values_mut() {
            peer.consumers.retain(|_, consumer| {
                if consumer.producer_id() == producer_id {
                    consumer.close();
                    consumers_closed += 1;
                    false
                } else {
                    true
                }
            });
        }

        room.broadcast(
            &ServerMessage::ProducerClosed(ProducerClosed {
                producer_id: producer_id.to_string(),
                user_id: user_id.clone(),
                kind: producer.kind(),
            }),
            Some(&user_id),
        );
        debug!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            user_id = %user_id,
            producer_id = %producer_id,
            consumers_closed,
            "Producer closed"
        );
        true
    }

    fn stop_recording(&mut self, room_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let RecordingSlot::Active(handle) = &room.recording else {
            return false;
        };
        handle.stop();
        info!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            session_id = %handle.session_id(),
            "Recording stop requested"
        );
        room.recording = RecordingSlot::Stopping(handle.clone());
        room.broadcast(&ServerMessage::RecordingStopped(RecordingStopped {}), None);
        true
    }

    fn recording_finished(&mut self, room_id: &str, session_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let unrequested = match &room.recording {
            RecordingSlot::Active(handle) if handle.session_id() == session_id => true,
            RecordingSlot::Stopping(handle) if handle.session_id() == session_id => false,
            _ => return,
        };
        room.recording = RecordingSlot::Idle;
        if unrequested {
            warn!(
                target: "sfu.actor.registry",
                room_id = %room_id,
                session_id = %session_id,
                "Recording ended without a stop request"
            );
            room.broadcast(&ServerMessage::RecordingStopped(RecordingStopped {}), None);
        }
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            peers: self.rooms.values().map(|room| room.peers.len()).sum(),
            producers: self.producer_index.len(),
        }
    }

    fn update_gauges(&self) {
        let stats = self.stats();
        metrics::set_rooms_active(stats.rooms);
        metrics::set_peers_active(stats.peers);
        metrics::set_producers_active(stats.producers);
    }

    /// Close every room without notifying peers. Returns the recording
    /// sessions that have been told to stop but have not finished yet.
    fn shutdown(&mut self) -> Vec<RecordingHandle> {
        let room_ids: Vec<String> = self.rooms.keys().cloned().collect();
        for room_id in &room_ids {
            self.close_room(room_id);
        }
        self.user_index.clear();
        self.update_gauges();

        let pending: Vec<RecordingHandle> = std::mem::take(&mut self.closed_recordings)
            .into_iter()
            .filter(|handle| !handle.is_finished())
            .collect();
        if !pending.is_empty() {
            info!(
                target: "sfu.actor.registry",
                recordings = pending.len(),
                "Recordings still finalizing at shutdown"
            );
        }
        pending
    }
}

fn snapshot(room_id: &str, room: &Room) -> RoomSnapshot {
    let peers = room.peers_in_join_order();
    RoomSnapshot {
        room_id: room_id.to_string(),
        producer_count: peers.iter().map(|(_, p)| p.producers.len()).sum(),
        consumer_count: peers.iter().map(|(_, p)| p.consumers.len()).sum(),
        transport_count: peers.iter().map(|(_, p)| p.transports.len()).sum(),
        peers: peers
            .into_iter()
            .map(|(user_id, peer)| peer.info(user_id))
            .collect(),
        recording: room.recording.status(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::engine::{WebRtcTransportOptions, WorkerSettings};
    use crate::media::local::LocalMediaEngine;
    use crate::media::rtp::{RtpCodecParameters, RtpEncodingParameters, RtpParameters};
    use crate::media::worker_pool::WorkerPool;
    use common::types::MediaKind;
    use std::time::Duration;

    struct TestPeer {
        key: PeerKey,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl TestPeer {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                out.push(message);
            }
            out
        }
    }

    async fn join(
        registry: &RoomRegistryHandle,
        room_id: &str,
        user_id: &str,
        connection_id: &str,
    ) -> Result<(TestPeer, AddedPeer), SfuError> {
        let (tx, rx) = mpsc::channel(64);
        let added = registry
            .add_peer(NewPeer {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                name: format!("{user_id}-name"),
                email: format!("{user_id}@example.com"),
                channel: PeerChannel {
                    connection_id: connection_id.to_string(),
                    sender: tx,
                },
            })
            .await?;
        Ok((
            TestPeer {
                key: PeerKey {
                    room_id: room_id.to_string(),
                    user_id: user_id.to_string(),
                    connection_id: connection_id.to_string(),
                },
                rx,
            },
            added,
        ))
    }

    async fn workers() -> WorkerPool {
        WorkerPool::init(
            &LocalMediaEngine::new(),
            1,
            WorkerSettings {
                rtc_min_port: 40000,
                rtc_max_port: 40100,
            },
        )
        .await
        .unwrap()
    }

    fn vp8() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 96,
                clock_rate: 90000,
                channels: None,
                parameters: serde_json::Map::new(),
            }],
            encodings: vec![RtpEncodingParameters { ssrc: Some(1) }],
            ..RtpParameters::default()
        }
    }

    /// Create a send transport and a video producer for `peer`.
    async fn produce(
        registry: &RoomRegistryHandle,
        workers: &WorkerPool,
        slot: &MediaRoomSlot,
        peer: &TestPeer,
    ) -> (Arc<dyn WebRtcTransport>, Arc<dyn Producer>) {
        let room = slot
            .get_or_init(workers, &WebRtcTransportOptions::announced("127.0.0.1"))
            .await
            .unwrap();
        let transport = room
            .create_transport(&peer.key.user_id, TransportDirection::Send)
            .await
            .unwrap();
        registry
            .add_transport(peer.key.clone(), TransportDirection::Send, Arc::clone(&transport))
            .await
            .unwrap();
        let producer = transport.produce(MediaKind::Video, vp8()).await.unwrap();
        registry
            .add_producer(peer.key.clone(), Arc::clone(&producer))
            .await
            .unwrap();
        (transport, producer)
    }

    fn spawn(policy: DuplicateJoinPolicy) -> RoomRegistryHandle {
        RoomRegistryActor::spawn(policy, CancellationToken::new()).0
    }

    #[tokio::test]
    async fn test_peers_listed_in_join_order() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        for user in ["carol", "alice", "bob"] {
            join(&registry, "room-1", user, &format!("conn-{user}"))
                .await
                .unwrap();
        }

        let peers: Vec<String> = registry
            .list_peers("room-1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(peers, vec!["carol", "alice", "bob"]);
        assert!(registry.list_peers("missing").await.unwrap().is_empty());

        let channel = registry.get_channel("alice").await.unwrap().unwrap();
        assert_eq!(channel.connection_id, "conn-alice");
    }

    #[tokio::test]
    async fn test_last_leave_removes_room_and_retires_media() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (alice, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (transport, producer) = produce(&registry, &workers, &added.media, &alice).await;

        let removed = registry.remove_peer(alice.key.clone()).await.unwrap().unwrap();
        assert!(removed.room_closed);
        assert!(producer.is_closed());
        assert!(transport.is_closed());
        assert!(added.media.is_retired());
        assert!(registry.get_room("room-1").await.unwrap().is_none());
        assert_eq!(registry.stats().await.unwrap(), RegistryStats::default());

        assert!(registry.remove_peer(alice.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_peer_broadcasts_peer_left_and_producer_closed() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (alice, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (mut bob, _) = join(&registry, "room-1", "bob", "c2").await.unwrap();
        let (_transport, producer) = produce(&registry, &workers, &added.media, &alice).await;

        let removed = registry.remove_peer(alice.key.clone()).await.unwrap().unwrap();
        assert!(!removed.room_closed);
        assert_eq!(removed.name, "alice-name");

        // Let the engine-side watcher report the close too.
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.stats().await.unwrap();

        let messages = bob.drain();
        let closed: Vec<_> = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::ProducerClosed(c) if c.producer_id == producer.id()))
            .collect();
        assert_eq!(closed.len(), 1);
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::PeerLeft(p) if p.user_id == "alice")));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::NewProducer(p) if p.producer_name == "alice-name")));
    }

    #[tokio::test]
    async fn test_engine_close_broadcasts_once() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (alice, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (mut bob, _) = join(&registry, "room-1", "bob", "c2").await.unwrap();
        let (transport, producer) = produce(&registry, &workers, &added.media, &alice).await;
        bob.drain();

        transport.close();
        let message = tokio::time::timeout(Duration::from_secs(1), bob.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            message,
            ServerMessage::ProducerClosed(c) if c.producer_id == producer.id() && c.user_id == "alice"
        ));

        // An explicit close afterwards finds nothing.
        let result = registry
            .close_producer(alice.key.clone(), producer.id())
            .await;
        assert!(matches!(result, Err(SfuError::ProducerNotFound(_))));
        registry.stats().await.unwrap();
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_close_producer_requires_owner() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (alice, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (bob, _) = join(&registry, "room-1", "bob", "c2").await.unwrap();
        let (_transport, producer) = produce(&registry, &workers, &added.media, &alice).await;

        let result = registry.close_producer(bob.key.clone(), producer.id()).await;
        assert!(matches!(result, Err(SfuError::PermissionDenied(_))));
        assert!(!producer.is_closed());

        registry
            .close_producer(alice.key.clone(), producer.id())
            .await
            .unwrap();
        assert!(producer.is_closed());
        assert!(registry.get_producer(producer.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_join_reject() {
        let registry = spawn(DuplicateJoinPolicy::Reject);
        join(&registry, "room-1", "alice", "c1").await.unwrap();
        let result = join(&registry, "room-1", "alice", "c2").await;
        assert!(matches!(result, Err(SfuError::DuplicatePeer(_))));

        // Rejoin from the same connection refreshes the entry.
        let (_, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        assert!(!added.replaced);
    }

    #[tokio::test]
    async fn test_duplicate_join_replace_closes_prior_session() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (mut old, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (_transport, producer) = produce(&registry, &workers, &added.media, &old).await;

        let (new, added) = join(&registry, "room-1", "alice", "c2").await.unwrap();
        assert!(added.replaced);
        assert!(producer.is_closed());
        assert!(old
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::Error(e) if e.message == SESSION_REPLACED_MESSAGE)));

        // The displaced connection can no longer act on the entry.
        assert!(registry.remove_peer(old.key.clone()).await.unwrap().is_none());
        let result = registry
            .get_transport(old.key.clone(), TransportDirection::Send)
            .await;
        assert!(matches!(result, Err(SfuError::NotJoined)));
        assert!(matches!(
            registry.check_peer(old.key.clone()).await,
            Err(SfuError::NotJoined)
        ));
        assert!(registry.check_peer(new.key.clone()).await.is_ok());

        let room = registry.get_room("room-1").await.unwrap().unwrap();
        assert_eq!(room.peers.len(), 1);
        assert_eq!(room.producer_count, 0);
        assert!(registry.remove_peer(new.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_join_overwrite_keeps_handles() {
        let registry = spawn(DuplicateJoinPolicy::Overwrite);
        let workers = workers().await;
        let (old, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (_transport, producer) = produce(&registry, &workers, &added.media, &old).await;

        let (new, added) = join(&registry, "room-1", "alice", "c2").await.unwrap();
        assert!(added.replaced);
        assert!(!producer.is_closed());
        let entry = registry.get_producer(producer.id()).await.unwrap().unwrap();
        assert_eq!(entry.user_id, "alice");
        assert!(registry
            .get_transport(new.key.clone(), TransportDirection::Send)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_list_producers_excludes_requester() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (alice, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let (bob, _) = join(&registry, "room-1", "bob", "c2").await.unwrap();
        produce(&registry, &workers, &added.media, &alice).await;
        produce(&registry, &workers, &added.media, &bob).await;

        let all = registry.list_producers("room-1", None).await.unwrap();
        let owners: Vec<&str> = all.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(owners, vec!["alice", "bob"]);

        let others = registry.list_producers("room-1", Some("bob")).await.unwrap();
        assert_eq!(others.len(), 1);
        assert!(others.iter().all(|e| e.user_id == "alice"));
    }

    #[tokio::test]
    async fn test_stale_transport_is_closed() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        let workers = workers().await;
        let (alice, added) = join(&registry, "room-1", "alice", "c1").await.unwrap();
        let room = added
            .media
            .get_or_init(&workers, &WebRtcTransportOptions::announced("127.0.0.1"))
            .await
            .unwrap();
        let transport = room
            .create_transport("alice", TransportDirection::Recv)
            .await
            .unwrap();

        let stale = PeerKey {
            connection_id: "other".to_string(),
            ..alice.key.clone()
        };
        let result = registry
            .add_transport(stale, TransportDirection::Recv, Arc::clone(&transport))
            .await;
        assert!(matches!(result, Err(SfuError::NotJoined)));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_recording_slot_allows_one_session() {
        let registry = spawn(DuplicateJoinPolicy::Replace);
        join(&registry, "room-1", "alice", "c1").await.unwrap();

        registry.reserve_recording("room-1").await.unwrap();
        let second = registry.reserve_recording("room-1").await;
        assert!(matches!(second, Err(SfuError::RecordingInProgress(_))));

        registry.release_recording("room-1").await.unwrap();
        registry.reserve_recording("room-1").await.unwrap();
        let room = registry.get_room("room-1").await.unwrap().unwrap();
        assert_eq!(room.recording, RoomRecordingStatus::Starting);

        assert!(!registry.stop_recording("room-1").await.unwrap());
        assert!(matches!(
            registry.reserve_recording("missing").await,
            Err(SfuError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mailbox_depth_counts_queued_messages() {
        let (registry, mut actor) =
            RoomRegistryActor::new(DuplicateJoinPolicy::Replace, CancellationToken::new());
        for _ in 0..5 {
            registry.release_recording("room-1").await.unwrap();
        }

        let first = actor.receiver.recv().await.unwrap();
        actor.process(first);
        assert_eq!(actor.mailbox.current_depth(), 4);

        while let Ok(message) = actor.receiver.try_recv() {
            actor.process(message);
        }
        assert_eq!(actor.mailbox.current_depth(), 0);
        assert_eq!(actor.mailbox.peak_depth(), 4);
        assert_eq!(actor.mailbox.messages_processed(), 5);
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let (registry, task) =
            RoomRegistryActor::spawn(DuplicateJoinPolicy::Replace, CancellationToken::new());
        join(&registry, "room-1", "alice", "c1").await.unwrap();
        registry.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.is_cancelled());
        assert!(matches!(
            registry.stats().await,
            Err(SfuError::Internal(_))
        ));
    }
}
