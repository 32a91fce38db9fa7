//! Core type definitions for certsync.
//!
//! This crate defines the plain types shared by the sync core and its
//! collaborators:
//! - Principal identifiers and the caller [`Identity`]
//! - Logical-clock [`SequenceToken`]s used to order writes by issue time
//! - Read strategies and the delivery events produced by a dual-channel read
//!
//! Nothing here performs I/O. Remote call bindings, stores and UI live in
//! their respective crates.

mod ids;
mod read;
mod token;

pub use ids::{Identity, PrincipalId};
pub use read::{ErrorEvent, FetchRequest, FetchStrategy, LoadEvent};
pub use token::{SequenceClock, SequenceToken};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown fetch strategy: {0}")]
    UnknownStrategy(String),
}
