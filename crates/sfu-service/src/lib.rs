//! SFU Session Orchestrator Library
//!
//! Control plane for a selective forwarding unit: it decides which media
//! flows exist and who receives them, while the media engine moves packets.
//!
//! - Round-robin pool of media workers; one routing context per room
//! - Room registry actor owning all peers, transports, producers and consumers
//! - Per-connection signaling state machine over WebSocket
//! - Composite recording of a room into one grid video via an external
//!   transcoder
//! - Room chat with history
//!
//! # Architecture
//!
//! ```text
//! WebSocket ──► SignalingHandler (one per connection)
//!                 ├── RoomRegistryActor (singleton, owns room state)
//!                 ├── MediaRoom (per room, on one pool worker)
//!                 ├── CompositeRecorder ──► RecordingSession ──► transcoder
//!                 └── ChatService
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Room registry actor and mailbox monitoring
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`media`] - Media engine boundary, worker pool and room contexts
//! - [`recording`] - Composite recording pipeline
//! - [`signaling`] - Wire protocol and connection handler

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod recording;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod signaling;
