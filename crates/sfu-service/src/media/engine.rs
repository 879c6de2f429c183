//! Media engine boundary.
//!
//! The forwarding engine (ICE/DTLS/SRTP, RTP routing) is an external
//! collaborator. The orchestrator only sees its object model through these
//! traits: workers host routers, routers host transports, transports host
//! producers and consumers. Closing a parent closes every child.
//!
//! All handles are shared as `Arc<dyn Trait>` so that a single owner (the
//! room registry or a recording session) decides when they are closed.

use super::rtp::{
    DtlsParameters, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportParameters,
};
use crate::errors::SfuError;
use async_trait::async_trait;
use common::types::MediaKind;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Settings applied to every worker at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

/// Options for a client-facing WebRTC transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcTransportOptions {
    pub listen_ip: String,
    pub announced_ip: String,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

impl WebRtcTransportOptions {
    /// UDP-preferred transport listening on all interfaces.
    #[must_use]
    pub fn announced(announced_ip: impl Into<String>) -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: announced_ip.into(),
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

/// Options for a plain RTP transport (used to feed the transcoder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainTransportOptions {
    pub listen_ip: String,
    pub rtcp_mux: bool,
    pub comedia: bool,
}

impl PlainTransportOptions {
    /// Loopback transport with RTCP multiplexing and explicit remote address.
    #[must_use]
    pub fn loopback() -> Self {
        Self {
            listen_ip: "127.0.0.1".to_string(),
            rtcp_mux: true,
            comedia: false,
        }
    }
}

/// Options for `Transport::consume`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOptions {
    pub producer_id: String,
    pub rtp_capabilities: RtpCapabilities,
    pub paused: bool,
}

/// Factory for media workers.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Launch a new worker.
    async fn create_worker(&self, settings: WorkerSettings) -> Result<Arc<dyn Worker>, SfuError>;
}

/// A media worker process.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Create a routing context with the given codec set.
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Arc<dyn Router>, SfuError>;

    /// Completes when the worker terminates unexpectedly.
    async fn died(&self);
}

/// A routing context bound to one worker.
#[async_trait]
pub trait Router: Send + Sync {
    fn id(&self) -> &str;

    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether an endpoint with `rtp_capabilities` can consume `producer_id`.
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> Result<Arc<dyn WebRtcTransport>, SfuError>;

    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>, SfuError>;

    /// Close the router and every transport created under it.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Operations shared by every transport flavor.
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> &str;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, SfuError>;

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn Consumer>, SfuError>;

    /// Close the transport and every producer/consumer on it. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Client-facing transport negotiated over ICE/DTLS.
#[async_trait]
pub trait WebRtcTransport: Transport {
    /// Negotiation parameters to send to the client.
    fn parameters(&self) -> TransportParameters;

    /// Complete the DTLS handshake with the client's parameters.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), SfuError>;
}

/// Plain RTP transport sending to a fixed remote address.
#[async_trait]
pub trait PlainTransport: Transport {
    /// Set the remote address RTP is sent to.
    async fn connect(&self, ip: &str, port: u16) -> Result<(), SfuError>;
}

/// A published media stream.
pub trait Producer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    /// Close the producer. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Token cancelled once the producer is closed, by any path.
    fn closed_token(&self) -> CancellationToken;
}

/// A subscription to a producer.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;

    fn producer_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn is_paused(&self) -> bool;

    async fn resume(&self) -> Result<(), SfuError>;

    async fn request_key_frame(&self) -> Result<(), SfuError>;

    /// Close the consumer. Idempotent.
    fn close(&self);

    /// Closed explicitly, by its transport, or because its producer closed.
    fn is_closed(&self) -> bool;
}
