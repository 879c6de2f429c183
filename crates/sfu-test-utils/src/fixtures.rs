//! Wire-format test data.
//!
//! Builders return the typed values and, where a request needs them, their
//! JSON form so tests can post exactly what a browser client would.

use common::types::MediaKind;
use serde_json::{json, Map, Value};
use sfu_service::media::rtp::{
    DtlsFingerprint, DtlsParameters, RtpCapabilities, RtpCodecParameters, RtpEncodingParameters,
    RtpParameters,
};

/// Send-side RTP parameters a client would offer for `kind`.
#[must_use]
pub fn rtp_parameters(kind: MediaKind, ssrc: u32) -> RtpParameters {
    let codec = match kind {
        MediaKind::Video => RtpCodecParameters {
            mime_type: "video/VP8".to_string(),
            payload_type: 96,
            clock_rate: 90000,
            channels: None,
            parameters: Map::new(),
        },
        MediaKind::Audio => RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
        },
    };
    RtpParameters {
        codecs: vec![codec],
        encodings: vec![RtpEncodingParameters { ssrc: Some(ssrc) }],
        ..RtpParameters::default()
    }
}

/// Client DTLS parameters for `connect-transport`.
#[must_use]
pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: Some("client".to_string()),
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89"
                .to_string(),
        }],
    }
}

/// Capabilities that can decode nothing.
#[must_use]
pub fn empty_capabilities() -> RtpCapabilities {
    RtpCapabilities::default()
}

/// Serialize a typed value for a request payload.
#[must_use]
pub fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// `join_room` payload.
#[must_use]
pub fn join_payload(room_id: &str, user_id: &str, name: &str) -> Value {
    json!({
        "roomId": room_id,
        "userId": user_id,
        "name": name,
        "email": format!("{user_id}@example.com"),
    })
}
