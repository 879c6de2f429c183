//! Persistence collaborators.
//!
//! Each repository is a trait so the service can be wired to a real store;
//! the in-memory implementations back the default binary and the tests.

pub mod chat;
pub mod meetings;

pub use chat::{ChatMessage, ChatRepository, InMemoryChatRepository};
pub use meetings::{
    InMemoryMeetingRepository, Meeting, MeetingParticipant, MeetingRepository, MeetingStatus,
};
