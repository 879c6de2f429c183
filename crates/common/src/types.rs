//! Common data types for the SFU orchestrator.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
}

impl MediaKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(ParseError::MediaKind(other.to_string())),
        }
    }
}

/// Direction of a peer transport, seen from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Carries the peer's producers.
    Send,
    /// Carries the peer's consumers.
    Recv,
}

impl TransportDirection {
    /// Returns the wire name of the direction.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageType {
    /// Plain user text.
    #[default]
    Text,
    /// Server-generated notice (join/leave).
    System,
    /// File reference posted by a user.
    File,
}

/// Public view of a peer in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// User identifier, unique within the room.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
}
