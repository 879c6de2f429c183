//! Media room context.
//!
//! Wraps one worker's router for a room and owns the per-peer WebRTC
//! transports keyed by `(userId, direction)`. The registry decides when a
//! room's context is created and retired; [`MediaRoomSlot`] makes creation
//! idempotent when several joins race on an empty room.

use super::engine::{
    PlainTransport, PlainTransportOptions, Router, Transport, WebRtcTransport,
    WebRtcTransportOptions, Worker,
};
use super::lock;
use super::rtp::{default_media_codecs, RtpCapabilities};
use super::worker_pool::WorkerPool;
use crate::errors::SfuError;
use common::types::TransportDirection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type TransportKey = (String, TransportDirection);

/// Routing context of a single room.
pub struct MediaRoom {
    room_id: String,
    worker_id: String,
    router: Arc<dyn Router>,
    transport_options: WebRtcTransportOptions,
    transports: Mutex<HashMap<TransportKey, Arc<dyn WebRtcTransport>>>,
}

impl MediaRoom {
    /// Create the room's router on `worker` with the fixed codec set.
    pub async fn init(
        room_id: String,
        worker: Arc<dyn Worker>,
        transport_options: WebRtcTransportOptions,
    ) -> Result<Arc<Self>, SfuError> {
        let router = worker.create_router(default_media_codecs()).await?;
        info!(
            target: "sfu.media.room",
            room_id = %room_id,
            worker_id = %worker.id(),
            router_id = %router.id(),
            "Media room created"
        );
        Ok(Arc::new(Self {
            room_id,
            worker_id: worker.id().to_string(),
            router,
            transport_options,
            transports: Mutex::new(HashMap::new()),
        }))
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    #[must_use]
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.router.rtp_capabilities()
    }

    /// Create a transport for `(user_id, direction)`.
    ///
    /// A second call for the same key replaces the first; the displaced
    /// transport is closed.
    pub async fn create_transport(
        &self,
        user_id: &str,
        direction: TransportDirection,
    ) -> Result<Arc<dyn WebRtcTransport>, SfuError> {
        let transport = self
            .router
            .create_webrtc_transport(self.transport_options.clone())
            .await?;

        let displaced = lock(&self.transports).insert(
            (user_id.to_string(), direction),
            Arc::clone(&transport),
        );
        if let Some(old) = displaced {
            debug!(
                target: "sfu.media.room",
                room_id = %self.room_id,
                user_id = %user_id,
                direction = %direction,
                transport_id = %old.id(),
                "Replacing existing transport"
            );
            old.close();
        }

        Ok(transport)
    }

    #[must_use]
    pub fn get_transport(
        &self,
        user_id: &str,
        direction: TransportDirection,
    ) -> Option<Arc<dyn WebRtcTransport>> {
        lock(&self.transports)
            .get(&(user_id.to_string(), direction))
            .cloned()
    }

    /// Close and forget every transport owned by `user_id`.
    pub fn remove_peer_transports(&self, user_id: &str) {
        let removed: Vec<_> = {
            let mut transports = lock(&self.transports);
            let keys: Vec<TransportKey> = transports
                .keys()
                .filter(|(owner, _)| owner == user_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| transports.remove(k)).collect()
        };
        for transport in removed {
            transport.close();
        }
    }

    /// Number of live per-peer transports.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        lock(&self.transports).len()
    }

    #[must_use]
    pub fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        self.router.can_consume(producer_id, rtp_capabilities)
    }

    /// Loopback plain transport for feeding the transcoder.
    pub async fn create_plain_transport(&self) -> Result<Arc<dyn PlainTransport>, SfuError> {
        self.router
            .create_plain_transport(PlainTransportOptions::loopback())
            .await
    }

    /// Close the router and every transport under it.
    pub fn close(&self) {
        let transports: Vec<_> = lock(&self.transports).drain().map(|(_, t)| t).collect();
        for transport in transports {
            transport.close();
        }
        self.router.close();
        info!(
            target: "sfu.media.room",
            room_id = %self.room_id,
            "Media room closed"
        );
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.router.is_closed()
    }
}

/// Lazily-initialized media room owned by a registry room entry.
pub struct MediaRoomSlot {
    room_id: String,
    cell: OnceCell<Arc<MediaRoom>>,
    retired: CancellationToken,
}

impl MediaRoomSlot {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            cell: OnceCell::new(),
            retired: CancellationToken::new(),
        }
    }

    /// Return the room's context, creating it on the next worker if needed.
    ///
    /// Concurrent callers share one initialization. If the slot was retired
    /// while initialization was in flight, the new context is closed and
    /// `RoomNotFound` is returned.
    pub async fn get_or_init(
        &self,
        workers: &WorkerPool,
        transport_options: &WebRtcTransportOptions,
    ) -> Result<Arc<MediaRoom>, SfuError> {
        if self.retired.is_cancelled() {
            return Err(SfuError::RoomNotFound(self.room_id.clone()));
        }

        let room = self
            .cell
            .get_or_try_init(|| async {
                let worker = workers.next()?;
                MediaRoom::init(self.room_id.clone(), worker, transport_options.clone()).await
            })
            .await?;

        if self.retired.is_cancelled() {
            room.close();
            return Err(SfuError::RoomNotFound(self.room_id.clone()));
        }
        Ok(Arc::clone(room))
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<MediaRoom>> {
        self.cell.get().cloned()
    }

    /// Close the context (if any) and refuse further initialization.
    pub fn retire(&self) {
        self.retired.cancel();
        if let Some(room) = self.cell.get() {
            room.close();
        }
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }
}
