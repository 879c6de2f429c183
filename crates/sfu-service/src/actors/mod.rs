//! Actor model for room state.
//!
//! A single `RoomRegistryActor` owns every room, peer and media handle.
//! Signaling connections talk to it through a cloneable
//! [`RoomRegistryHandle`]; requests carry a `oneshot` reply channel.
//!
//! - [`registry`] - the actor and its handle
//! - [`messages`] - request/notification types
//! - [`metrics`] - mailbox depth monitoring

pub mod messages;
pub mod metrics;
pub mod registry;

pub use messages::{
    outbound_channel, AddedPeer, NewPeer, PeerChannel, PeerKey, ProducerEntry, RegistryStats,
    RemovedPeer, RoomRecordingStatus, RoomSnapshot, OUTBOUND_QUEUE_CAPACITY,
};
pub use metrics::MailboxMonitor;
pub use registry::{RoomRegistryActor, RoomRegistryHandle, SESSION_REPLACED_MESSAGE};
