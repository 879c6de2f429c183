//! In-process SFU with socket-free signaling clients.
//!
//! [`TestSfu`] wires the same services `main` does, but with capturing
//! collaborators and a temporary recordings directory. [`TestClient`] drives
//! a real `SignalingHandler` and reads its outbound queue directly.

use crate::capture::{CapturingBlobStore, CapturingPublisher};
use crate::fixtures::{dtls_parameters, rtp_parameters, to_json};
use anyhow::{anyhow, bail};
use common::types::{MediaKind, TransportDirection};
use serde_json::{json, Value};
use sfu_service::actors::{outbound_channel, RoomRegistryActor, RoomRegistryHandle};
use sfu_service::config::DuplicateJoinPolicy;
use sfu_service::media::rtp::{RtpCapabilities, TransportParameters};
use sfu_service::media::{LocalMediaEngine, WebRtcTransportOptions, WorkerPool, WorkerSettings};
use sfu_service::observability::HealthState;
use sfu_service::recording::{CompositeRecorder, RecorderSettings, RecordingHandle};
use sfu_service::repositories::{
    InMemoryChatRepository, InMemoryMeetingRepository, MeetingRepository,
};
use sfu_service::routes::AppState;
use sfu_service::services::{BlobStore, ChatService, EventPublisher};
use sfu_service::signaling::protocol::ConsumerCreated;
use sfu_service::signaling::{ServerMessage, SignalingHandler, SignalingServices};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default wait for asynchronous broadcasts.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(2);

/// Wire name of an outbound message.
#[must_use]
pub fn event_name(message: &ServerMessage) -> String {
    serde_json::to_value(message)
        .ok()
        .and_then(|v| v.get("event").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default()
}

/// Builder for [`TestSfu`].
#[derive(Debug)]
pub struct TestSfuBuilder {
    duplicate_join_policy: DuplicateJoinPolicy,
    transcoder_path: String,
    worker_count: usize,
    blob_store: CapturingBlobStore,
}

impl Default for TestSfuBuilder {
    fn default() -> Self {
        Self {
            duplicate_join_policy: DuplicateJoinPolicy::Replace,
            transcoder_path: "ffmpeg".to_string(),
            worker_count: 2,
            blob_store: CapturingBlobStore::new(),
        }
    }
}

impl TestSfuBuilder {
    #[must_use]
    pub fn duplicate_join_policy(mut self, policy: DuplicateJoinPolicy) -> Self {
        self.duplicate_join_policy = policy;
        self
    }

    #[must_use]
    pub fn transcoder(mut self, path: impl Into<String>) -> Self {
        self.transcoder_path = path.into();
        self
    }

    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    #[must_use]
    pub fn blob_store(mut self, store: CapturingBlobStore) -> Self {
        self.blob_store = store;
        self
    }

    pub async fn build(self) -> anyhow::Result<TestSfu> {
        let dir = tempfile::tempdir()?;
        let workers = WorkerPool::init(
            &LocalMediaEngine::new(),
            self.worker_count,
            WorkerSettings {
                rtc_min_port: 40000,
                rtc_max_port: 40999,
            },
        )
        .await?;
        let (registry, registry_task) =
            RoomRegistryActor::spawn(self.duplicate_join_policy, CancellationToken::new());

        let meetings = Arc::new(InMemoryMeetingRepository::new());
        let publisher = Arc::new(CapturingPublisher::new());
        let blob_store = Arc::new(self.blob_store);
        let recorder = CompositeRecorder::new(
            RecorderSettings {
                recordings_dir: dir.path().join("recordings"),
                transcoder_path: self.transcoder_path,
                max_width: 1280,
                max_height: 720,
                settle_delay: Duration::from_millis(20),
                keyframe_interval: Duration::from_millis(50),
            },
            Arc::clone(&meetings) as Arc<dyn MeetingRepository>,
            Arc::clone(&blob_store) as Arc<dyn BlobStore>,
            Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        );

        let services = Arc::new(SignalingServices {
            registry,
            workers: Arc::new(workers),
            recorder: Arc::new(recorder),
            chat: ChatService::new(Arc::new(InMemoryChatRepository::new()), 50),
            transport_options: WebRtcTransportOptions::announced("127.0.0.1"),
        });

        Ok(TestSfu {
            services,
            meetings,
            publisher,
            blob_store,
            health: Arc::new(HealthState::new()),
            registry_task: Some(registry_task),
            dir,
        })
    }
}

/// A complete set of signaling services for one test.
pub struct TestSfu {
    pub services: Arc<SignalingServices>,
    pub meetings: Arc<InMemoryMeetingRepository>,
    pub publisher: Arc<CapturingPublisher>,
    pub blob_store: Arc<CapturingBlobStore>,
    pub health: Arc<HealthState>,
    registry_task: Option<JoinHandle<Vec<RecordingHandle>>>,
    dir: TempDir,
}

impl TestSfu {
    #[must_use]
    pub fn builder() -> TestSfuBuilder {
        TestSfuBuilder::default()
    }

    /// Start with default settings.
    pub async fn start() -> anyhow::Result<Self> {
        Self::builder().build().await
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.services.registry
    }

    /// Directory recordings are written to.
    #[must_use]
    pub fn recordings_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("recordings")
    }

    /// Scratch directory owned by this instance.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }

    /// A new, unjoined client.
    #[must_use]
    pub fn connect(&self) -> TestClient {
        let (sender, receiver) = outbound_channel();
        TestClient {
            handler: SignalingHandler::new(Arc::clone(&self.services), sender),
            receiver,
            pending: VecDeque::new(),
            registry: self.services.registry.clone(),
            capabilities: None,
            next_ssrc: 1000,
        }
    }

    /// Stop the registry the way process shutdown does and return the
    /// recordings it left finalizing.
    pub async fn shutdown(&mut self) -> anyhow::Result<Vec<RecordingHandle>> {
        self.services.registry.cancel();
        let task = self
            .registry_task
            .take()
            .ok_or_else(|| anyhow!("registry already shut down"))?;
        Ok(task.await?)
    }

    /// State for building the HTTP router.
    #[must_use]
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            services: Arc::clone(&self.services),
            health: Arc::clone(&self.health),
        })
    }
}

impl Drop for TestSfu {
    fn drop(&mut self) {
        self.services.registry.cancel();
    }
}

/// One signaling connection without a socket.
pub struct TestClient {
    handler: SignalingHandler,
    receiver: mpsc::Receiver<ServerMessage>,
    pending: VecDeque<ServerMessage>,
    registry: RoomRegistryHandle,
    capabilities: Option<RtpCapabilities>,
    next_ssrc: u32,
}

impl TestClient {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.handler.connection_id()
    }

    #[must_use]
    pub fn session(&self) -> Option<(&str, &str)> {
        self.handler.session()
    }

    /// Router capabilities received on join.
    #[must_use]
    pub fn capabilities(&self) -> Option<&RtpCapabilities> {
        self.capabilities.as_ref()
    }

    /// Send one event and wait until the registry has processed everything
    /// it caused.
    pub async fn send(&mut self, event: &str, data: Value) {
        let raw = json!({ "event": event, "data": data }).to_string();
        self.send_raw(&raw).await;
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.handler.handle_text(raw).await;
        let _ = self.registry.stats().await;
    }

    /// Everything received so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        while let Ok(message) = self.receiver.try_recv() {
            self.pending.push_back(message);
        }
        self.pending.drain(..).collect()
    }

    /// Event names of everything received so far.
    pub fn drain_events(&mut self) -> Vec<String> {
        self.drain().iter().map(event_name).collect()
    }

    /// Wait for the first message matching `pred`; earlier non-matching
    /// messages are discarded.
    pub async fn wait_for<F>(&mut self, pred: F) -> Option<ServerMessage>
    where
        F: Fn(&ServerMessage) -> bool,
    {
        while let Some(message) = self.pending.pop_front() {
            if pred(&message) {
                return Some(message);
            }
        }
        let deadline = tokio::time::Instant::now() + DEFAULT_WAIT;
        loop {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(message)) if pred(&message) => return Some(message),
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Simulate the socket closing.
    pub async fn close(&mut self) {
        self.handler.close().await;
        let _ = self.registry.stats().await;
    }

    /// Join and return every message received in response.
    pub async fn join(&mut self, room_id: &str, user_id: &str, name: &str) -> Vec<ServerMessage> {
        self.send(
            "join_room",
            json!({
                "roomId": room_id,
                "userId": user_id,
                "name": name,
                "email": format!("{user_id}@example.com"),
            }),
        )
        .await;
        let messages = self.drain();
        if let Some(caps) = messages.iter().find_map(|m| match m {
            ServerMessage::RouterRtpCapabilities(caps) => Some(caps.clone()),
            _ => None,
        }) {
            self.capabilities = Some(caps);
        }
        messages
    }

    /// Create and connect a transport.
    pub async fn open_transport(
        &mut self,
        room_id: &str,
        user_id: &str,
        direction: TransportDirection,
    ) -> anyhow::Result<TransportParameters> {
        self.send(
            "create-transport",
            json!({ "roomId": room_id, "userId": user_id, "direction": direction }),
        )
        .await;
        let created = self.take_reply(|m| match m {
            ServerMessage::TransportCreated(created) => Some(created.transport.clone()),
            _ => None,
        })?;

        self.send(
            "connect-transport",
            json!({
                "roomId": room_id,
                "userId": user_id,
                "direction": direction,
                "dtlsParameters": to_json(&dtls_parameters()),
            }),
        )
        .await;
        self.take_reply(|m| match m {
            ServerMessage::TransportConnected(c) if c.direction == direction => Some(()),
            _ => None,
        })?;
        Ok(created)
    }

    /// Produce a track of `kind` on the send transport; returns the producer id.
    pub async fn publish(
        &mut self,
        room_id: &str,
        user_id: &str,
        kind: MediaKind,
    ) -> anyhow::Result<String> {
        self.next_ssrc += 1;
        self.send(
            "produce",
            json!({
                "roomId": room_id,
                "userId": user_id,
                "kind": kind,
                "rtpParameters": to_json(&rtp_parameters(kind, self.next_ssrc)),
            }),
        )
        .await;
        self.take_reply(|m| match m {
            ServerMessage::Produced(p) => Some(p.producer_id.clone()),
            _ => None,
        })
    }

    /// Consume `producer_id` with the capabilities received on join.
    pub async fn subscribe(
        &mut self,
        room_id: &str,
        user_id: &str,
        producer_id: &str,
    ) -> anyhow::Result<ConsumerCreated> {
        let caps = self
            .capabilities
            .clone()
            .ok_or_else(|| anyhow!("client has not joined"))?;
        self.send(
            "consume",
            json!({
                "roomId": room_id,
                "userId": user_id,
                "producerId": producer_id,
                "rtpCapabilities": to_json(&caps),
            }),
        )
        .await;
        self.take_reply(|m| match m {
            ServerMessage::ConsumerCreated(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Pick the reply out of the received messages. Other messages stay
    /// queued; an error reply fails.
    fn take_reply<T, F>(&mut self, pick: F) -> anyhow::Result<T>
    where
        F: Fn(&ServerMessage) -> Option<T>,
    {
        let mut reply = None;
        for message in self.drain() {
            if reply.is_none() {
                if let ServerMessage::Error(e) = &message {
                    bail!("server replied with error: {}", e.message);
                }
                if let Some(value) = pick(&message) {
                    reply = Some(value);
                    continue;
                }
            }
            self.pending.push_back(message);
        }
        reply.ok_or_else(|| anyhow!("no reply received"))
    }
}
