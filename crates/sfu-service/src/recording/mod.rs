//! Composite recording pipeline.
//!
//! - [`layout`] - grid geometry for N participants
//! - [`ffmpeg`] - filter graphs and transcoder arguments
//! - [`sdp`] - stream description consumed by the transcoder
//! - [`ports`] - loopback UDP port reservation
//! - [`recorder`] - launches a session from a room's producers
//! - [`session`] - supervises the transcoder until it exits

pub mod ffmpeg;
pub mod layout;
pub mod ports;
pub mod recorder;
pub mod sdp;
pub mod session;

pub use layout::GridLayout;
pub use recorder::{CompositeRecorder, RecorderSettings, RecordingParticipant, RecordingRequest};
pub use session::{wait_all_completed, RecordingHandle, RecordingState, STOP_GRACE_PERIOD};
