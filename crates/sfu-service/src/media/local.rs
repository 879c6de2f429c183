//! In-process media engine.
//!
//! Implements the engine object model (ids, negotiation parameters, close
//! cascades, worker death) without moving any RTP. It backs the service
//! when no external forwarding engine is attached and drives the tests.
//!
//! Close cascades are expressed with `CancellationToken` parent/child
//! relationships: worker -> router -> transport -> producer/consumer. A
//! consumer additionally observes its producer's token.

use super::engine::{
    ConsumeOptions, Consumer, MediaEngine, PlainTransport, PlainTransportOptions, Producer,
    Router, Transport, WebRtcTransport, WebRtcTransportOptions, Worker, WorkerSettings,
};
use super::lock;
use super::rtp::{
    DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpParameters,
    TransportParameters,
};
use crate::errors::SfuError;
use async_trait::async_trait;
use common::types::MediaKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// First dynamic RTP payload type assigned to router codecs.
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

/// Engine that creates in-process workers.
#[derive(Debug, Default)]
pub struct LocalMediaEngine;

impl LocalMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn create_worker(&self, settings: WorkerSettings) -> Result<Arc<dyn Worker>, SfuError> {
        Ok(Arc::new(LocalWorker::new(settings)?))
    }
}

/// Round-robin cursor over a worker's RTC port range.
#[derive(Debug)]
struct PortCursor {
    min: u16,
    span: u32,
    next: AtomicU32,
}

impl PortCursor {
    fn next_port(&self) -> u16 {
        let offset = self.next.fetch_add(1, Ordering::Relaxed) % self.span;
        u16::try_from(u32::from(self.min) + offset).unwrap_or(self.min)
    }
}

/// An in-process worker.
#[derive(Debug)]
pub struct LocalWorker {
    id: String,
    ports: Arc<PortCursor>,
    death: CancellationToken,
}

impl LocalWorker {
    /// Create a worker bound to the given port range.
    pub fn new(settings: WorkerSettings) -> Result<Self, SfuError> {
        if settings.rtc_min_port > settings.rtc_max_port {
            return Err(SfuError::Engine(format!(
                "invalid RTC port range {}-{}",
                settings.rtc_min_port, settings.rtc_max_port
            )));
        }
        let span = u32::from(settings.rtc_max_port) - u32::from(settings.rtc_min_port) + 1;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            ports: Arc::new(PortCursor {
                min: settings.rtc_min_port,
                span,
                next: AtomicU32::new(0),
            }),
            death: CancellationToken::new(),
        })
    }

    /// Simulate the worker process terminating. Closes every router on it.
    pub fn kill(&self) {
        self.death.cancel();
    }
}

#[async_trait]
impl Worker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Arc<dyn Router>, SfuError> {
        if self.death.is_cancelled() {
            return Err(SfuError::WorkerDied(self.id.clone()));
        }
        Ok(Arc::new(LocalRouter::new(
            media_codecs,
            self.death.child_token(),
            Arc::clone(&self.ports),
        )))
    }

    async fn died(&self) {
        self.death.cancelled().await;
    }
}

struct ProducerRecord {
    rtp_parameters: RtpParameters,
    closed: CancellationToken,
}

struct RouterShared {
    id: String,
    capabilities: RtpCapabilities,
    closed: CancellationToken,
    ports: Arc<PortCursor>,
    producers: Mutex<HashMap<String, ProducerRecord>>,
}

impl RouterShared {
    fn payload_type_for(&self, mime_type: &str) -> Option<u8> {
        self.capabilities
            .codecs
            .iter()
            .find(|c| c.mime_type.eq_ignore_ascii_case(mime_type))
            .and_then(|c| c.preferred_payload_type)
    }
}

/// An in-process router.
pub struct LocalRouter {
    shared: Arc<RouterShared>,
}

impl LocalRouter {
    fn new(
        media_codecs: Vec<RtpCodecCapability>,
        closed: CancellationToken,
        ports: Arc<PortCursor>,
    ) -> Self {
        let codecs = media_codecs
            .into_iter()
            .zip(FIRST_DYNAMIC_PAYLOAD_TYPE..)
            .map(|(mut codec, payload_type)| {
                codec.preferred_payload_type.get_or_insert(payload_type);
                codec
            })
            .collect();

        Self {
            shared: Arc::new(RouterShared {
                id: Uuid::new_v4().to_string(),
                capabilities: RtpCapabilities {
                    codecs,
                    header_extensions: Vec::new(),
                },
                closed,
                ports,
                producers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), SfuError> {
        if self.shared.closed.is_cancelled() {
            return Err(SfuError::Engine(format!(
                "router {} is closed",
                self.shared.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Router for LocalRouter {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.shared.capabilities.clone()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let producers = lock(&self.shared.producers);
        let Some(record) = producers.get(producer_id) else {
            return false;
        };
        if record.closed.is_cancelled() {
            return false;
        }
        record
            .rtp_parameters
            .primary_codec()
            .is_some_and(|codec| rtp_capabilities.supports_mime_type(&codec.mime_type))
    }

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> Result<Arc<dyn WebRtcTransport>, SfuError> {
        self.ensure_open()?;
        let core = TransportCore::new(Arc::clone(&self.shared));
        let port = self.shared.ports.next_port();

        let mut ice_candidates = Vec::new();
        if options.enable_udp {
            ice_candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1_076_302_079,
                ip: options.announced_ip.clone(),
                port,
                protocol: "udp".to_string(),
                candidate_type: "host".to_string(),
            });
        }
        if options.enable_tcp {
            ice_candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: if options.prefer_udp {
                    1_076_276_479
                } else {
                    1_076_302_079
                },
                ip: options.announced_ip.clone(),
                port,
                protocol: "tcp".to_string(),
                candidate_type: "host".to_string(),
            });
        }

        let ufrag = Uuid::new_v4().simple().to_string();
        let parameters = TransportParameters {
            id: core.id.clone(),
            ice_parameters: IceParameters {
                username_fragment: ufrag.get(..16).unwrap_or(&ufrag).to_string(),
                password: Uuid::new_v4().simple().to_string(),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: Some("auto".to_string()),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: placeholder_fingerprint(),
                }],
            },
        };

        Ok(Arc::new(LocalWebRtcTransport {
            core,
            parameters,
            connected: AtomicBool::new(false),
        }))
    }

    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>, SfuError> {
        self.ensure_open()?;
        Ok(Arc::new(LocalPlainTransport {
            core: TransportCore::new(Arc::clone(&self.shared)),
            options,
            remote: Mutex::new(None),
        }))
    }

    fn close(&self) {
        self.shared.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

fn placeholder_fingerprint() -> String {
    Uuid::new_v4()
        .into_bytes()
        .iter()
        .chain(Uuid::new_v4().into_bytes().iter())
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn random_ssrc() -> u32 {
    let value = Uuid::new_v4().as_u128() & u128::from(u32::MAX);
    u32::try_from(value).unwrap_or(1).max(1)
}

/// Produce/consume logic shared by both transport flavors.
struct TransportCore {
    id: String,
    router: Arc<RouterShared>,
    closed: CancellationToken,
}

impl TransportCore {
    fn new(router: Arc<RouterShared>) -> Self {
        let closed = router.closed.child_token();
        Self {
            id: Uuid::new_v4().to_string(),
            router,
            closed,
        }
    }

    fn ensure_open(&self) -> Result<(), SfuError> {
        if self.closed.is_cancelled() {
            return Err(SfuError::Engine(format!("transport {} is closed", self.id)));
        }
        Ok(())
    }

    fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, SfuError> {
        self.ensure_open()?;
        let codec = rtp_parameters
            .primary_codec()
            .ok_or_else(|| SfuError::Engine("rtpParameters contain no codecs".to_string()))?;

        let codec_kind = codec
            .mime_type
            .split_once('/')
            .and_then(|(prefix, _)| prefix.to_ascii_lowercase().parse::<MediaKind>().ok());
        if codec_kind != Some(kind) {
            return Err(SfuError::Engine(format!(
                "codec {} does not match kind {kind}",
                codec.mime_type
            )));
        }
        if !self.router.capabilities.supports_mime_type(&codec.mime_type) {
            return Err(SfuError::Engine(format!(
                "unsupported codec {}",
                codec.mime_type
            )));
        }

        let producer = Arc::new(LocalProducer {
            id: Uuid::new_v4().to_string(),
            kind,
            rtp_parameters: rtp_parameters.clone(),
            closed: self.closed.child_token(),
        });

        let mut producers = lock(&self.router.producers);
        producers.retain(|_, record| !record.closed.is_cancelled());
        producers.insert(
            producer.id.clone(),
            ProducerRecord {
                rtp_parameters,
                closed: producer.closed.clone(),
            },
        );

        debug!(
            target: "sfu.media.local",
            transport_id = %self.id,
            producer_id = %producer.id,
            kind = %kind,
            "Producer created"
        );
        Ok(producer)
    }

    fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn Consumer>, SfuError> {
        self.ensure_open()?;
        let (codec, producer_closed) = {
            let producers = lock(&self.router.producers);
            let record = producers
                .get(&options.producer_id)
                .filter(|record| !record.closed.is_cancelled())
                .ok_or_else(|| {
                    SfuError::Engine(format!("producer {} not found", options.producer_id))
                })?;
            let codec = record
                .rtp_parameters
                .primary_codec()
                .cloned()
                .ok_or_else(|| SfuError::Engine("producer has no codec".to_string()))?;
            (codec, record.closed.clone())
        };

        if !options.rtp_capabilities.supports_mime_type(&codec.mime_type) {
            return Err(SfuError::Engine(format!(
                "cannot consume {} with the given capabilities",
                codec.mime_type
            )));
        }

        let kind = codec
            .mime_type
            .split_once('/')
            .and_then(|(prefix, _)| prefix.to_ascii_lowercase().parse::<MediaKind>().ok())
            .ok_or_else(|| SfuError::Engine(format!("invalid mime type {}", codec.mime_type)))?;

        let payload_type = self
            .router
            .payload_type_for(&codec.mime_type)
            .unwrap_or(codec.payload_type);

        let rtp_parameters = RtpParameters {
            mid: None,
            codecs: vec![RtpCodecParameters {
                payload_type,
                ..codec
            }],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(random_ssrc()),
            }],
            header_extensions: Vec::new(),
            rtcp: None,
        };

        Ok(Arc::new(LocalConsumer {
            id: Uuid::new_v4().to_string(),
            producer_id: options.producer_id,
            kind,
            rtp_parameters,
            paused: AtomicBool::new(options.paused),
            key_frame_requests: AtomicU64::new(0),
            closed: self.closed.child_token(),
            producer_closed,
        }))
    }
}

/// In-process WebRTC transport.
pub struct LocalWebRtcTransport {
    core: TransportCore,
    parameters: TransportParameters,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for LocalWebRtcTransport {
    fn id(&self) -> &str {
        &self.core.id
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, SfuError> {
        self.core.produce(kind, rtp_parameters)
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn Consumer>, SfuError> {
        self.core.consume(options)
    }

    fn close(&self) {
        self.core.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.core.closed.is_cancelled()
    }
}

#[async_trait]
impl WebRtcTransport for LocalWebRtcTransport {
    fn parameters(&self) -> TransportParameters {
        self.parameters.clone()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), SfuError> {
        self.core.ensure_open()?;
        if dtls_parameters.fingerprints.is_empty() {
            return Err(SfuError::Engine(
                "dtlsParameters must contain at least one fingerprint".to_string(),
            ));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(SfuError::Engine(format!(
                "transport {} already connected",
                self.core.id
            )));
        }
        Ok(())
    }
}

/// In-process plain RTP transport.
pub struct LocalPlainTransport {
    core: TransportCore,
    options: PlainTransportOptions,
    remote: Mutex<Option<(String, u16)>>,
}

impl LocalPlainTransport {
    /// Remote address set by `connect`, if any.
    #[must_use]
    pub fn remote(&self) -> Option<(String, u16)> {
        lock(&self.remote).clone()
    }

    #[must_use]
    pub fn options(&self) -> &PlainTransportOptions {
        &self.options
    }
}

#[async_trait]
impl Transport for LocalPlainTransport {
    fn id(&self) -> &str {
        &self.core.id
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, SfuError> {
        self.core.produce(kind, rtp_parameters)
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn Consumer>, SfuError> {
        self.core.consume(options)
    }

    fn close(&self) {
        self.core.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.core.closed.is_cancelled()
    }
}

#[async_trait]
impl PlainTransport for LocalPlainTransport {
    async fn connect(&self, ip: &str, port: u16) -> Result<(), SfuError> {
        self.core.ensure_open()?;
        *lock(&self.remote) = Some((ip.to_string(), port));
        Ok(())
    }
}

/// In-process producer.
pub struct LocalProducer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    closed: CancellationToken,
}

impl Producer for LocalProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// In-process consumer.
pub struct LocalConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    key_frame_requests: AtomicU64,
    closed: CancellationToken,
    producer_closed: CancellationToken,
}

impl LocalConsumer {
    /// Number of keyframe requests received so far.
    #[must_use]
    pub fn key_frame_requests(&self) -> u64 {
        self.key_frame_requests.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), SfuError> {
        if self.is_closed() {
            return Err(SfuError::Engine(format!("consumer {} is closed", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for LocalConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), SfuError> {
        self.ensure_open()?;
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn request_key_frame(&self) -> Result<(), SfuError> {
        self.ensure_open()?;
        if self.kind == MediaKind::Video {
            self.key_frame_requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.producer_closed.is_cancelled()
    }
}
