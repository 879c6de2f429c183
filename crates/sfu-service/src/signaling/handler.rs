//! Per-connection signaling state machine.
//!
//! A connection starts unjoined. `join_room` binds it to `(roomId, userId)`;
//! every later request naming a room or user must match that binding. Errors
//! are replied to this connection only and never leave registry state half
//! updated.

use super::protocol::{
    ChatHistory, ChatHistoryRequest, ClientMessage, CloseProducerRequest, ConnectTransportRequest,
    ConsumeRequest, ConsumerCreated, CreateTransportRequest, JoinRoomRequest, JoinedRoom,
    LeaveRoomRequest, ParticipantsList, ParticipantsRequest, ProduceRequest, Produced,
    RecordingStarted, SendMessageRequest, ServerMessage, StartRecordingRequest,
    StopRecordingRequest, TransportConnected, TransportCreated,
};
use crate::actors::{NewPeer, PeerChannel, PeerKey, RoomRegistryHandle};
use crate::errors::SfuError;
use crate::media::engine::{
    ConsumeOptions, Consumer, Producer, Transport, WebRtcTransport, WebRtcTransportOptions,
};
use crate::media::room::MediaRoom;
use crate::media::worker_pool::WorkerPool;
use crate::observability::metrics;
use crate::recording::{CompositeRecorder, RecordingHandle, RecordingParticipant, RecordingRequest};
use crate::repositories::MeetingParticipant;
use crate::services::ChatService;
use common::types::{ChatMessageType, MediaKind, PeerInfo, TransportDirection};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Display name used when a join omits one.
pub const DEFAULT_PEER_NAME: &str = "Guest";

/// Email used when a join omits one.
pub const DEFAULT_PEER_EMAIL: &str = "guest@example.com";

/// Shared collaborators for every connection.
pub struct SignalingServices {
    pub registry: RoomRegistryHandle,
    pub workers: Arc<WorkerPool>,
    pub recorder: Arc<CompositeRecorder>,
    pub chat: ChatService,
    pub transport_options: WebRtcTransportOptions,
}

#[derive(Debug, Clone)]
struct Session {
    room_id: String,
    user_id: String,
}

/// Signaling handler for one connection.
pub struct SignalingHandler {
    connection_id: String,
    services: Arc<SignalingServices>,
    channel: PeerChannel,
    session: Option<Session>,
}

impl SignalingHandler {
    #[must_use]
    pub fn new(
        services: Arc<SignalingServices>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let connection_id = Uuid::new_v4().to_string();
        Self {
            channel: PeerChannel {
                connection_id: connection_id.clone(),
                sender,
            },
            connection_id,
            services,
            session: None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// `(room_id, user_id)` this connection is joined as.
    #[must_use]
    pub fn session(&self) -> Option<(&str, &str)> {
        self.session
            .as_ref()
            .map(|s| (s.room_id.as_str(), s.user_id.as_str()))
    }

    /// Handle one inbound text frame.
    #[instrument(skip_all, name = "sfu.signaling.message", fields(connection_id = %self.connection_id))]
    pub async fn handle_text(&mut self, raw: &str) {
        let (event, result) = match ClientMessage::parse(raw) {
            Ok(message) => {
                let event = message.event_name();
                metrics::record_signaling_message(event);
                (event, self.dispatch(message).await)
            }
            Err(e) => ("invalid", Err(e)),
        };

        if let Err(e) = result {
            debug!(
                target: "sfu.signaling",
                connection_id = %self.connection_id,
                event,
                error = %e,
                "Signaling request failed"
            );
            metrics::record_signaling_error(e.error_code());
            self.reply(ServerMessage::error(&e));
        }
    }

    /// Binary frames are not part of the protocol.
    pub fn handle_binary(&mut self) {
        let err = SfuError::Protocol("Binary frames are not supported".to_string());
        debug!(
            target: "sfu.signaling",
            connection_id = %self.connection_id,
            "Rejected binary frame"
        );
        metrics::record_signaling_error(err.error_code());
        self.reply(ServerMessage::error(&err));
    }

    /// The connection went away: leave whatever room it joined.
    pub async fn close(&mut self) {
        if let Err(e) = self.leave().await {
            warn!(
                target: "sfu.signaling",
                connection_id = %self.connection_id,
                error = %e,
                "Failed to remove peer on disconnect"
            );
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), SfuError> {
        match message {
            ClientMessage::JoinRoom(req) => self.join_room(req).await,
            ClientMessage::LeaveRoom(req) => self.leave_room(req).await,
            ClientMessage::CreateTransport(req) => self.create_transport(req).await,
            ClientMessage::ConnectTransport(req) => self.connect_transport(req).await,
            ClientMessage::Produce(req) => self.produce(req).await,
            ClientMessage::Consume(req) => self.consume(req).await,
            ClientMessage::CloseProducer(req) => self.close_producer(req).await,
            ClientMessage::StartRecording(req) => self.start_recording(req).await,
            ClientMessage::StopRecording(req) => self.stop_recording(req).await,
            ClientMessage::SendMessage(req) => self.send_message(req).await,
            ClientMessage::GetChatHistory(req) => self.chat_history(req).await,
            ClientMessage::GetParticipants(req) => self.participants(req).await,
        }
    }

    fn reply(&self, message: ServerMessage) {
        self.channel.send(message);
    }

    fn registry(&self) -> &RoomRegistryHandle {
        &self.services.registry
    }

    /// Key for `(room_id, user_id)` if this connection is joined as that peer.
    fn peer_key(&self, room_id: &str, user_id: &str) -> Result<PeerKey, SfuError> {
        match &self.session {
            Some(s) if s.room_id == room_id && s.user_id == user_id => Ok(PeerKey {
                room_id: s.room_id.clone(),
                user_id: s.user_id.clone(),
                connection_id: self.connection_id.clone(),
            }),
            _ => Err(SfuError::NotJoined),
        }
    }

    fn require_room(&self, room_id: &str) -> Result<&Session, SfuError> {
        self.session
            .as_ref()
            .filter(|s| s.room_id == room_id)
            .ok_or(SfuError::NotJoined)
    }

    async fn media_room(&self, room_id: &str) -> Result<Arc<MediaRoom>, SfuError> {
        self.registry()
            .media_slot(room_id)
            .await?
            .get()
            .ok_or_else(|| SfuError::RoomNotFound(room_id.to_string()))
    }

    async fn announce_system(&self, room_id: &str, content: String) {
        match self.services.chat.system_message(room_id, &content).await {
            Ok(message) => {
                let _ = self
                    .registry()
                    .broadcast(room_id, ServerMessage::NewMessage(message), None)
                    .await;
            }
            Err(e) => {
                warn!(
                    target: "sfu.signaling",
                    room_id = %room_id,
                    error = %e,
                    "Failed to store system message"
                );
            }
        }
    }

    async fn join_room(&mut self, req: JoinRoomRequest) -> Result<(), SfuError> {
        let name = non_blank(req.name).unwrap_or_else(|| DEFAULT_PEER_NAME.to_string());
        let email = non_blank(req.email).unwrap_or_else(|| DEFAULT_PEER_EMAIL.to_string());

        let rejoin = self
            .session
            .as_ref()
            .is_some_and(|s| s.room_id == req.room_id && s.user_id == req.user_id);
        if !rejoin {
            self.leave().await?;
        }

        let added = self
            .registry()
            .add_peer(NewPeer {
                room_id: req.room_id.clone(),
                user_id: req.user_id.clone(),
                name: name.clone(),
                email: email.clone(),
                channel: self.channel.clone(),
            })
            .await?;

        let media = match added
            .media
            .get_or_init(&self.services.workers, &self.services.transport_options)
            .await
        {
            Ok(media) => media,
            Err(e) => {
                let _ = self
                    .registry()
                    .remove_peer(PeerKey {
                        room_id: req.room_id.clone(),
                        user_id: req.user_id.clone(),
                        connection_id: self.connection_id.clone(),
                    })
                    .await;
                return Err(e);
            }
        };

        self.session = Some(Session {
            room_id: req.room_id.clone(),
            user_id: req.user_id.clone(),
        });

        self.reply(ServerMessage::RouterRtpCapabilities(media.rtp_capabilities()));
        let existing = self
            .registry()
            .list_producers(&req.room_id, Some(&req.user_id))
            .await?;
        for entry in &existing {
            self.reply(ServerMessage::NewProducer(entry.to_announcement()));
        }
        self.reply(ServerMessage::JoinedRoom(JoinedRoom {
            room_id: req.room_id.clone(),
        }));

        info!(
            target: "sfu.signaling",
            connection_id = %self.connection_id,
            room_id = %req.room_id,
            user_id = %req.user_id,
            worker_id = %media.worker_id(),
            existing_producers = existing.len(),
            replaced = added.replaced,
            "Peer joined room"
        );

        if !rejoin {
            self.announce_system(&req.room_id, format!("{name} joined the room"))
                .await;
            self.registry()
                .broadcast(
                    &req.room_id,
                    ServerMessage::ParticipantJoined(PeerInfo {
                        user_id: req.user_id.clone(),
                        name,
                        email,
                    }),
                    Some(&req.user_id),
                )
                .await?;
        }
        Ok(())
    }

    async fn leave_room(&mut self, req: LeaveRoomRequest) -> Result<(), SfuError> {
        if let Some(session) = &self.session {
            let room_matches = req.room_id.as_ref().map_or(true, |r| *r == session.room_id);
            let user_matches = req.user_id.as_ref().map_or(true, |u| *u == session.user_id);
            if !room_matches || !user_matches {
                return Err(SfuError::NotJoined);
            }
        }
        self.leave().await
    }

    async fn leave(&mut self) -> Result<(), SfuError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let removed = self
            .registry()
            .remove_peer(PeerKey {
                room_id: session.room_id.clone(),
                user_id: session.user_id.clone(),
                connection_id: self.connection_id.clone(),
            })
            .await?;

        if let Some(removed) = removed {
            info!(
                target: "sfu.signaling",
                connection_id = %self.connection_id,
                room_id = %session.room_id,
                user_id = %session.user_id,
                room_closed = removed.room_closed,
                "Peer left room"
            );
            if !removed.room_closed {
                self.announce_system(&session.room_id, format!("{} left the room", removed.name))
                    .await;
            }
        }
        Ok(())
    }

    async fn create_transport(&mut self, req: CreateTransportRequest) -> Result<(), SfuError> {
        let key = self.peer_key(&req.room_id, &req.user_id)?;
        // A replaced connection must not displace its successor's transport.
        self.registry().check_peer(key.clone()).await?;
        let media = self.media_room(&req.room_id).await?;
        let transport = media.create_transport(&req.user_id, req.direction).await?;
        self.registry()
            .add_transport(key, req.direction, Arc::clone(&transport))
            .await?;

        self.reply(ServerMessage::TransportCreated(TransportCreated {
            direction: req.direction,
            transport: transport.parameters(),
        }));
        Ok(())
    }

    async fn connect_transport(&mut self, req: ConnectTransportRequest) -> Result<(), SfuError> {
        let key = self.peer_key(&req.room_id, &req.user_id)?;
        let transport = self.registry().get_transport(key, req.direction).await?;
        transport.connect(req.dtls_parameters).await?;

        self.reply(ServerMessage::TransportConnected(TransportConnected {
            direction: req.direction,
        }));
        Ok(())
    }

    async fn produce(&mut self, req: ProduceRequest) -> Result<(), SfuError> {
        let key = self.peer_key(&req.room_id, &req.user_id)?;
        let transport = self
            .registry()
            .get_transport(key.clone(), TransportDirection::Send)
            .await?;
        let producer = transport.produce(req.kind, req.rtp_parameters).await?;
        let reply = Produced {
            producer_id: producer.id().to_string(),
            kind: producer.kind(),
            rtp_parameters: producer.rtp_parameters(),
        };
        self.registry().add_producer(key, producer).await?;

        self.reply(ServerMessage::Produced(reply));
        Ok(())
    }

    async fn consume(&mut self, req: ConsumeRequest) -> Result<(), SfuError> {
        let key = self.peer_key(&req.room_id, &req.user_id)?;
        let media = self.media_room(&req.room_id).await?;
        self.registry()
            .get_producer(&req.producer_id)
            .await?
            .filter(|entry| entry.room_id == req.room_id)
            .ok_or_else(|| SfuError::ProducerNotFound(req.producer_id.clone()))?;
        let transport = self
            .registry()
            .get_transport(key.clone(), TransportDirection::Recv)
            .await?;
        if !media.can_consume(&req.producer_id, &req.rtp_capabilities) {
            return Err(SfuError::CannotConsume(req.producer_id));
        }

        let consumer = transport
            .consume(ConsumeOptions {
                producer_id: req.producer_id,
                rtp_capabilities: req.rtp_capabilities,
                paused: true,
            })
            .await?;
        self.registry()
            .add_consumer(key, Arc::clone(&consumer))
            .await?;
        consumer.resume().await?;

        self.reply(ServerMessage::ConsumerCreated(ConsumerCreated {
            id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        }));
        Ok(())
    }

    async fn close_producer(&mut self, req: CloseProducerRequest) -> Result<(), SfuError> {
        let key = self.peer_key(&req.room_id, &req.user_id)?;
        self.registry().close_producer(key, &req.producer_id).await
    }

    async fn start_recording(&mut self, req: StartRecordingRequest) -> Result<(), SfuError> {
        self.peer_key(&req.room_id, &req.user_id)?;
        let media = self.media_room(&req.room_id).await?;
        for producer_id in [&req.video_producer_id, &req.audio_producer_id] {
            self.registry()
                .get_producer(producer_id)
                .await?
                .filter(|entry| entry.room_id == req.room_id)
                .ok_or_else(|| SfuError::ProducerNotFound(producer_id.clone()))?;
        }

        self.registry().reserve_recording(&req.room_id).await?;
        let handle = match self.launch_recording(&media, &req).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.registry().release_recording(&req.room_id).await;
                return Err(e);
            }
        };
        if let Err(e) = self
            .registry()
            .activate_recording(&req.room_id, handle.clone())
            .await
        {
            handle.stop();
            return Err(e);
        }

        info!(
            target: "sfu.signaling",
            room_id = %req.room_id,
            started_by = %req.user_id,
            session_id = %handle.session_id(),
            "Recording started"
        );
        let announced = self
            .registry()
            .broadcast(
                &req.room_id,
                ServerMessage::RecordingStarted(RecordingStarted {
                    started_by: req.user_id.clone(),
                }),
                None,
            )
            .await;

        let registry = self.registry().clone();
        let room_id = req.room_id.clone();
        tokio::spawn(async move {
            let video_path = handle.wait_completed().await;
            debug!(
                target: "sfu.signaling",
                room_id = %room_id,
                session_id = %handle.session_id(),
                produced_output = video_path.is_some(),
                "Recording session completed"
            );
            let _ = registry
                .recording_finished(&room_id, handle.session_id())
                .await;
        });
        announced
    }

    async fn launch_recording(
        &self,
        media: &MediaRoom,
        req: &StartRecordingRequest,
    ) -> Result<RecordingHandle, SfuError> {
        let producers = self.registry().list_producers(&req.room_id, None).await?;
        let mut participants: Vec<RecordingParticipant> = Vec::new();
        for entry in producers {
            let index = match participants.iter().position(|p| p.user_id == entry.user_id) {
                Some(index) => index,
                None => {
                    participants.push(RecordingParticipant {
                        user_id: entry.user_id.clone(),
                        name: entry.user_name.clone(),
                        email: entry.user_email.clone(),
                        video: None,
                        audio: None,
                    });
                    participants.len() - 1
                }
            };
            if let Some(participant) = participants.get_mut(index) {
                let slot = match entry.producer.kind() {
                    MediaKind::Video => &mut participant.video,
                    MediaKind::Audio => &mut participant.audio,
                };
                if slot.is_none() && !entry.producer.is_closed() {
                    *slot = Some(entry.producer);
                }
            }
        }

        let meeting_participants = self
            .registry()
            .list_peers(&req.room_id)
            .await?
            .into_iter()
            .map(|peer| MeetingParticipant {
                name: peer.name,
                email: peer.email,
            })
            .collect();

        self.services
            .recorder
            .start(
                media,
                RecordingRequest {
                    room_id: req.room_id.clone(),
                    started_by: req.user_id.clone(),
                    participants,
                    meeting_participants,
                },
            )
            .await
    }

    async fn stop_recording(&mut self, req: StopRecordingRequest) -> Result<(), SfuError> {
        self.require_room(&req.room_id)?;
        let stopped = self.registry().stop_recording(&req.room_id).await?;
        if !stopped {
            debug!(
                target: "sfu.signaling",
                room_id = %req.room_id,
                "No active recording to stop"
            );
        }
        Ok(())
    }

    async fn send_message(&mut self, req: SendMessageRequest) -> Result<(), SfuError> {
        let key = self.peer_key(&req.room_id, &req.sender_id)?;
        if req.message_type == ChatMessageType::System {
            return Err(SfuError::InvalidRequest(
                "system messages are reserved for the server".to_string(),
            ));
        }
        let sender = self
            .registry()
            .get_peer(&key.room_id, &key.user_id)
            .await?
            .ok_or_else(|| SfuError::PeerNotFound(key.user_id.clone()))?;

        let message = self
            .services
            .chat
            .send(&req.room_id, &sender, &req.content, req.message_type)
            .await?;
        self.registry()
            .broadcast(
                &req.room_id,
                ServerMessage::NewMessage(message.clone()),
                Some(&key.user_id),
            )
            .await?;

        self.reply(ServerMessage::MessageSent(message));
        Ok(())
    }

    async fn chat_history(&mut self, req: ChatHistoryRequest) -> Result<(), SfuError> {
        self.require_room(&req.room_id)?;
        let messages = self
            .services
            .chat
            .history(&req.room_id, req.limit, req.before)
            .await?;

        self.reply(ServerMessage::ChatHistory(ChatHistory {
            room_id: req.room_id,
            messages,
        }));
        Ok(())
    }

    async fn participants(&mut self, req: ParticipantsRequest) -> Result<(), SfuError> {
        self.require_room(&req.room_id)?;
        let participants = self.registry().list_peers(&req.room_id).await?;

        self.reply(ServerMessage::ParticipantsList(ParticipantsList {
            room_id: req.room_id,
            count: participants.len(),
            participants,
        }));
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::RoomRegistryActor;
    use crate::config::DuplicateJoinPolicy;
    use crate::media::engine::WorkerSettings;
    use crate::media::local::LocalMediaEngine;
    use crate::recording::RecorderSettings;
    use crate::repositories::{InMemoryChatRepository, InMemoryMeetingRepository};
    use crate::services::{LocalBlobStore, LoggingEventPublisher};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn services(dir: &std::path::Path) -> Arc<SignalingServices> {
        let workers = WorkerPool::init(
            &LocalMediaEngine::new(),
            1,
            WorkerSettings {
                rtc_min_port: 40000,
                rtc_max_port: 40100,
            },
        )
        .await
        .unwrap();
        let (registry, _task) =
            RoomRegistryActor::spawn(DuplicateJoinPolicy::Replace, CancellationToken::new());
        let recorder = CompositeRecorder::new(
            RecorderSettings {
                recordings_dir: dir.to_path_buf(),
                transcoder_path: "ffmpeg".to_string(),
                max_width: 1280,
                max_height: 720,
                settle_delay: Duration::from_millis(10),
                keyframe_interval: Duration::from_millis(100),
            },
            Arc::new(InMemoryMeetingRepository::new()),
            Arc::new(LocalBlobStore::new(dir.join("store"), "http://localhost")),
            Arc::new(LoggingEventPublisher),
        );
        Arc::new(SignalingServices {
            registry,
            workers: Arc::new(workers),
            recorder: Arc::new(recorder),
            chat: ChatService::new(Arc::new(InMemoryChatRepository::new()), 50),
            transport_options: WebRtcTransportOptions::announced("127.0.0.1"),
        })
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_unknown_event_replies_error_and_stays_usable() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut handler = SignalingHandler::new(services(dir.path()).await, tx);

        handler.handle_text(r#"{"event":"dance","data":{}}"#).await;
        handler.handle_text("not json").await;
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .all(|m| matches!(m, ServerMessage::Error(_))));

        handler
            .handle_text(r#"{"event":"join_room","data":{"roomId":"r1","userId":"alice"}}"#)
            .await;
        assert_eq!(handler.session(), Some(("r1", "alice")));
    }

    #[tokio::test]
    async fn test_binary_frame_replies_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut handler = SignalingHandler::new(services(dir.path()).await, tx);

        handler.handle_binary();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages.first(),
            Some(ServerMessage::Error(e)) if e.message.starts_with("Protocol error")
        ));
        assert_eq!(handler.session(), None);
    }

    #[tokio::test]
    async fn test_join_applies_defaults_and_reply_order() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(dir.path()).await;
        let (tx, mut rx) = mpsc::channel(64);
        let mut handler = SignalingHandler::new(Arc::clone(&services), tx);

        handler
            .handle_text(r#"{"event":"join_room","data":{"roomId":"r1","userId":"alice"}}"#)
            .await;

        let messages = drain(&mut rx);
        assert!(matches!(
            messages.first(),
            Some(ServerMessage::RouterRtpCapabilities(_))
        ));
        assert!(matches!(
            messages.get(1),
            Some(ServerMessage::JoinedRoom(j)) if j.room_id == "r1"
        ));

        let peer = services
            .registry
            .get_peer("r1", "alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer.name, DEFAULT_PEER_NAME);
        assert_eq!(peer.email, DEFAULT_PEER_EMAIL);
    }

    #[tokio::test]
    async fn test_requests_before_join_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut handler = SignalingHandler::new(services(dir.path()).await, tx);

        handler
            .handle_text(
                r#"{"event":"create-transport","data":{"roomId":"r1","userId":"alice","direction":"send"}}"#,
            )
            .await;
        let messages = drain(&mut rx);
        assert!(matches!(
            messages.as_slice(),
            [ServerMessage::Error(e)] if e.message == SfuError::NotJoined.client_message()
        ));
    }

    #[tokio::test]
    async fn test_connect_without_transport_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut handler = SignalingHandler::new(services(dir.path()).await, tx);
        handler
            .handle_text(r#"{"event":"join_room","data":{"roomId":"r1","userId":"alice"}}"#)
            .await;
        drain(&mut rx);

        handler
            .handle_text(
                r#"{"event":"connect-transport","data":{"roomId":"r1","userId":"alice","direction":"recv","dtlsParameters":{"fingerprints":[{"algorithm":"sha-256","value":"AB"}]}}}"#,
            )
            .await;
        let messages = drain(&mut rx);
        assert!(matches!(
            messages.as_slice(),
            [ServerMessage::Error(e)] if e.message.starts_with("Transport not found")
        ));
    }

    #[tokio::test]
    async fn test_close_leaves_room() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(dir.path()).await;
        let (tx, _rx) = mpsc::channel(64);
        let mut handler = SignalingHandler::new(Arc::clone(&services), tx);
        handler
            .handle_text(r#"{"event":"join_room","data":{"roomId":"r1","userId":"alice"}}"#)
            .await;

        handler.close().await;
        assert!(handler.session().is_none());
        assert!(services.registry.get_room("r1").await.unwrap().is_none());

        // Closing twice is harmless.
        handler.close().await;
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  Ann ".to_string())), Some("Ann".to_string()));
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(None), None);
    }
}
