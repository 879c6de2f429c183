//! SFU service error types.
//!
//! Every error that reaches a signaling connection is replied to that
//! connection only, as `{"event":"error","data":{"message":...}}`. The
//! connection stays open and no registry state is mutated by a failed
//! request. Internal details are logged server-side but not exposed to
//! clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// SFU service error type.
///
/// Grouped by how the failure is handled:
/// - Protocol: malformed envelope or unknown event (code 1)
/// - Precondition: missing room/peer/transport/producer, failed capability
///   check, recording already active (codes 4, 5, 9)
/// - Engine: the media engine rejected a call (code 8)
/// - Resource exhaustion: no free port, no worker (code 7)
/// - Internal / fatal: actor channel closed, worker died (code 6)
#[derive(Debug, Error)]
pub enum SfuError {
    /// Envelope could not be parsed or names an unknown event.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection has not joined a room yet.
    #[error("Connection has not joined a room")]
    NotJoined,

    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Peer is not a member of the room.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// No transport for the requested direction.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer does not exist (or belongs to another room).
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// The requester's capabilities cannot consume the producer.
    #[error("Cannot consume producer: {0}")]
    CannotConsume(String),

    /// A peer with the same id is already in the room.
    #[error("Peer already joined: {0}")]
    DuplicatePeer(String),

    /// The peer does not own the producer.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A recording session is already starting or active for the room.
    #[error("Recording already in progress for room {0}")]
    RecordingInProgress(String),

    /// No participant has both an audio and a video producer.
    #[error("No valid producers for recording")]
    NoValidProducers,

    /// Request payload failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Media engine call failed.
    #[error("Media engine error: {0}")]
    Engine(String),

    /// Resource allocation failed (ports, workers).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transcoder process could not be started or failed.
    #[error("Transcoder error: {0}")]
    Transcoder(String),

    /// A media worker died. Fatal to the process.
    #[error("Media worker died: {0}")]
    WorkerDied(String),

    /// Persistence collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SfuError {
    /// Returns a numeric error code for metrics and logs.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SfuError::Protocol(_) | SfuError::InvalidRequest(_) => 1, // BAD_REQUEST
            SfuError::NotJoined | SfuError::PermissionDenied(_) => 3, // FORBIDDEN
            SfuError::RoomNotFound(_)
            | SfuError::PeerNotFound(_)
            | SfuError::TransportNotFound(_)
            | SfuError::ProducerNotFound(_) => 4, // NOT_FOUND
            SfuError::DuplicatePeer(_) | SfuError::RecordingInProgress(_) => 5, // CONFLICT
            SfuError::Internal(_)
            | SfuError::WorkerDied(_)
            | SfuError::Storage(_)
            | SfuError::Transcoder(_) => 6, // INTERNAL_ERROR
            SfuError::ResourceExhausted(_) => 7, // RESOURCE_EXHAUSTED
            SfuError::Engine(_) => 8,            // ENGINE_ERROR
            SfuError::CannotConsume(_) | SfuError::NoValidProducers => 9, // PRECONDITION_FAILED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SfuError::Internal(_) | SfuError::Storage(_) | SfuError::WorkerDied(_) => {
                "An internal error occurred".to_string()
            }
            SfuError::Transcoder(_) | SfuError::ResourceExhausted(_) => {
                "Server failed to start the recording process".to_string()
            }
            SfuError::Engine(msg) => format!("Media operation failed: {msg}"),
            other => other.to_string(),
        }
    }
}

/// JSON error body for the REST endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String,
}

impl SfuError {
    fn status_code(&self) -> StatusCode {
        match self.error_code() {
            1 => StatusCode::BAD_REQUEST,
            3 => StatusCode::FORBIDDEN,
            4 => StatusCode::NOT_FOUND,
            5 => StatusCode::CONFLICT,
            7 => StatusCode::SERVICE_UNAVAILABLE,
            8 | 9 => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SfuError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(target: "sfu.http", error = %self, "Request failed");
        }
        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(SfuError::Protocol("bad json".to_string()).error_code(), 1);
        assert_eq!(SfuError::NotJoined.error_code(), 3);
        assert_eq!(SfuError::RoomNotFound("r".to_string()).error_code(), 4);
        assert_eq!(
            SfuError::TransportNotFound("send".to_string()).error_code(),
            4
        );
        assert_eq!(
            SfuError::RecordingInProgress("r".to_string()).error_code(),
            5
        );
        assert_eq!(SfuError::Internal("closed".to_string()).error_code(), 6);
        assert_eq!(
            SfuError::ResourceExhausted("ports".to_string()).error_code(),
            7
        );
        assert_eq!(SfuError::Engine("rejected".to_string()).error_code(), 8);
        assert_eq!(SfuError::NoValidProducers.error_code(), 9);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SfuError::Internal("channel send failed: receiver dropped".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = SfuError::Transcoder("No such file or directory: /usr/bin/ffmpeg".to_string());
        assert!(!err.client_message().contains("/usr/bin"));
    }

    #[test]
    fn test_precondition_messages_are_forwarded() {
        assert_eq!(
            SfuError::ProducerNotFound("p-1".to_string()).client_message(),
            "Producer not found: p-1"
        );
        assert_eq!(
            SfuError::RecordingInProgress("room-1".to_string()).client_message(),
            "Recording already in progress for room room-1"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            SfuError::RoomNotFound("r".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SfuError::Storage("disk".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SfuError::InvalidRequest("limit".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
