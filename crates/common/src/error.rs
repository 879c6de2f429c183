//! Common error types for the SFU orchestrator.

use thiserror::Error;

/// Errors raised when parsing a wire token into a domain type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Media kind is neither `audio` nor `video`.
    #[error("Invalid media kind: {0}")]
    MediaKind(String),
}
