//! Signaling wire protocol.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <object>}`.
//! Inbound envelopes are parsed into the closed [`ClientMessage`] union
//! before anything else happens; outbound frames are [`ServerMessage`]
//! values serialized with the same envelope shape.

use crate::errors::SfuError;
use crate::media::rtp::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParameters};
use crate::repositories::ChatMessage;
use chrono::{DateTime, Utc};
use common::types::{ChatMessageType, MediaKind, PeerInfo, TransportDirection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomRequest {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub room_id: String,
    pub user_id: String,
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub room_id: String,
    pub user_id: String,
    pub direction: TransportDirection,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub room_id: String,
    pub user_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub room_id: String,
    pub user_id: String,
    pub producer_id: String,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerRequest {
    pub room_id: String,
    pub user_id: String,
    pub producer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    pub room_id: String,
    pub user_id: String,
    pub video_producer_id: String,
    pub audio_producer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingRequest {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: ChatMessageType,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryRequest {
    pub room_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsRequest {
    pub room_id: String,
}

/// An inbound signaling request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinRoom(JoinRoomRequest),
    LeaveRoom(LeaveRoomRequest),
    CreateTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
    CloseProducer(CloseProducerRequest),
    StartRecording(StartRecordingRequest),
    StopRecording(StopRecordingRequest),
    SendMessage(SendMessageRequest),
    GetChatHistory(ChatHistoryRequest),
    GetParticipants(ParticipantsRequest),
}

impl ClientMessage {
    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, SfuError> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|_| SfuError::Protocol("Invalid JSON".to_string()))?;
        let data = if envelope.data.is_null() {
            Value::Object(Map::new())
        } else {
            envelope.data
        };

        let event = envelope.event.as_str();
        let message = match event {
            "join_room" => ClientMessage::JoinRoom(payload(event, data)?),
            "leave_room" => ClientMessage::LeaveRoom(payload(event, data)?),
            "create-transport" => ClientMessage::CreateTransport(payload(event, data)?),
            "connect-transport" => ClientMessage::ConnectTransport(payload(event, data)?),
            "produce" => ClientMessage::Produce(payload(event, data)?),
            "consume" => ClientMessage::Consume(payload(event, data)?),
            "close-producer" => ClientMessage::CloseProducer(payload(event, data)?),
            "start-recording" => ClientMessage::StartRecording(payload(event, data)?),
            "stop-recording" => ClientMessage::StopRecording(payload(event, data)?),
            "send-message" => ClientMessage::SendMessage(payload(event, data)?),
            "get-chat-history" => ClientMessage::GetChatHistory(payload(event, data)?),
            "get-participants" => ClientMessage::GetParticipants(payload(event, data)?),
            _ => return Err(SfuError::Protocol("Unknown event".to_string())),
        };
        Ok(message)
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom(_) => "join_room",
            ClientMessage::LeaveRoom(_) => "leave_room",
            ClientMessage::CreateTransport(_) => "create-transport",
            ClientMessage::ConnectTransport(_) => "connect-transport",
            ClientMessage::Produce(_) => "produce",
            ClientMessage::Consume(_) => "consume",
            ClientMessage::CloseProducer(_) => "close-producer",
            ClientMessage::StartRecording(_) => "start-recording",
            ClientMessage::StopRecording(_) => "stop-recording",
            ClientMessage::SendMessage(_) => "send-message",
            ClientMessage::GetChatHistory(_) => "get-chat-history",
            ClientMessage::GetParticipants(_) => "get-participants",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, SfuError> {
    serde_json::from_value(data)
        .map_err(|e| SfuError::Protocol(format!("Invalid payload for {event}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAnnouncement {
    pub producer_id: String,
    pub kind: MediaKind,
    pub user_id: String,
    pub producer_name: String,
    pub producer_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreated {
    pub direction: TransportDirection,
    pub transport: TransportParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConnected {
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Produced {
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerCreated {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerClosed {
    pub producer_id: String,
    pub user_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeft {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStarted {
    pub started_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStopped {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub room_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsList {
    pub room_id: String,
    pub count: usize,
    pub participants: Vec<PeerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// An outbound signaling frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "router-rtp-capabilities")]
    RouterRtpCapabilities(RtpCapabilities),
    #[serde(rename = "new-producer")]
    NewProducer(ProducerAnnouncement),
    #[serde(rename = "joined_room")]
    JoinedRoom(JoinedRoom),
    #[serde(rename = "participant-joined")]
    ParticipantJoined(PeerInfo),
    #[serde(rename = "transport-created")]
    TransportCreated(TransportCreated),
    #[serde(rename = "transport-connected")]
    TransportConnected(TransportConnected),
    #[serde(rename = "produced")]
    Produced(Produced),
    #[serde(rename = "consumer-created")]
    ConsumerCreated(ConsumerCreated),
    #[serde(rename = "producer-closed")]
    ProducerClosed(ProducerClosed),
    #[serde(rename = "peer-left")]
    PeerLeft(PeerLeft),
    #[serde(rename = "recording-started")]
    RecordingStarted(RecordingStarted),
    #[serde(rename = "recording-stopped")]
    RecordingStopped(RecordingStopped),
    #[serde(rename = "new-message")]
    NewMessage(ChatMessage),
    #[serde(rename = "message-sent")]
    MessageSent(ChatMessage),
    #[serde(rename = "chat-history")]
    ChatHistory(ChatHistory),
    #[serde(rename = "participants-list")]
    ParticipantsList(ParticipantsList),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerMessage {
    /// Error reply carrying the client-safe message of `err`.
    #[must_use]
    pub fn error(err: &SfuError) -> Self {
        ServerMessage::Error(ErrorPayload {
            message: err.client_message(),
        })
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, SfuError> {
        serde_json::to_string(self)
            .map_err(|e| SfuError::Internal(format!("serialization failed: {e}")))
    }
}
