//! Service-layer collaborators: chat, object storage and event publication.

pub mod chat;
pub mod events;
pub mod storage;

pub use chat::ChatService;
pub use events::{EventParticipant, EventPublisher, LoggingEventPublisher, RecordingCompletedEvent};
pub use storage::{BlobStore, LocalBlobStore, StoredObject};
