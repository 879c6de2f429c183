//! Common types shared across the SFU orchestrator crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;
