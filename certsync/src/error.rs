//! Error types for the sync core.

use certsync_types::FetchStrategy;
use thiserror::Error;

/// Result type for sync core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned to callers of the sync core.
///
/// Per-channel and per-item failures are never returned through this type;
/// they are handed to sinks and batch observers instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A certified read was requested without a signed-in identity.
    #[error("{strategy} read requires a signed-in identity")]
    IdentityRequired { strategy: FetchStrategy },

    /// A batch was started while another one is still settling.
    #[error("a batch is already in progress")]
    BatchInProgress,

    /// The poll scheduler task is gone.
    #[error("poll scheduler closed")]
    SchedulerClosed,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single remote call failed.
///
/// Raised by the transport collaborator and delivered to the sink of the
/// channel it happened on; it is never fatal to the other channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    /// Creates a transport error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
