//! # SFU Test Utilities
//!
//! Shared test utilities for the SFU service. Everything here runs in
//! process: the in-memory media engine stands in for real workers and a shell
//! script stands in for the transcoder.
//!
//! ## Modules
//!
//! - `fixtures` - RTP/DTLS parameter builders in wire format
//! - `fake_transcoder` - shell scripts that behave like the transcoder
//! - `capture` - blob store and event publisher that record their calls
//! - `harness` - a full set of signaling services plus socket-free clients
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_test_utils::TestSfu;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let sfu = TestSfu::start().await.unwrap();
//!     let mut alice = sfu.connect();
//!     alice.join("room-1", "alice", "Alice").await;
//!     let producer_id = alice.publish("room-1", "alice", MediaKind::Video).await.unwrap();
//! }
//! ```

pub mod capture;
pub mod fake_transcoder;
pub mod fixtures;
pub mod harness;

pub use capture::{CapturingBlobStore, CapturingPublisher};
pub use fake_transcoder::FakeTranscoder;
pub use fixtures::*;
pub use harness::{event_name, TestClient, TestSfu, TestSfuBuilder};
