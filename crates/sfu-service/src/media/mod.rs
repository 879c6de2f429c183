//! Media plane orchestration.
//!
//! - [`engine`] - trait boundary to the forwarding engine
//! - [`local`] - in-process engine implementation
//! - [`rtp`] - negotiation parameter types exchanged with clients
//! - [`worker_pool`] - round-robin worker balancer
//! - [`room`] - per-room routing context and its lazy-init slot

pub mod engine;
pub mod local;
pub mod room;
pub mod rtp;
pub mod worker_pool;

pub use engine::{
    ConsumeOptions, Consumer, MediaEngine, PlainTransport, PlainTransportOptions, Producer,
    Router, Transport, WebRtcTransport, WebRtcTransportOptions, Worker, WorkerSettings,
};
pub use local::{LocalMediaEngine, LocalWorker};
pub use room::{MediaRoom, MediaRoomSlot};
pub use worker_pool::WorkerPool;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
