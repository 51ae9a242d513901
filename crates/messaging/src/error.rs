use thiserror::Error;

use crate::MessageError;

/// Errors returned by a message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel cannot be reached right now.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// The receipt no longer identifies an in-flight delivery; the lease
    /// expired or the message was already acknowledged.
    #[error("Stale receipt {receipt} on queue {queue}")]
    StaleReceipt { queue: String, receipt: String },

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl ChannelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
