//! Signaling over WebSocket.
//!
//! Event-tagged JSON envelopes (`{"event": ..., "data": ...}`) drive a
//! per-connection state machine against the room registry and media rooms.

pub mod handler;
pub mod protocol;
pub mod ws;

pub use handler::{SignalingHandler, SignalingServices};
pub use protocol::{ClientMessage, ServerMessage};
