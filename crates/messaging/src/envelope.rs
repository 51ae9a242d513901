use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle for acknowledging one delivery of a message.
///
/// Each delivery gets a fresh receipt, so a receipt from a lease that expired
/// and was redelivered cannot remove the message from under the new holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(Uuid);

impl ReceiptHandle {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as stored on a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub queue: String,

    /// Ordering key. At most one message per group is in flight.
    pub group_id: String,

    /// JSON body.
    pub body: String,

    pub published_at: DateTime<Utc>,
}

/// One delivery of an envelope to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub receipt: ReceiptHandle,

    /// How many times this message has been handed out, this one included.
    pub receive_count: u32,
}

impl Delivery {
    pub fn message_id(&self) -> MessageId {
        self.envelope.message_id
    }

    pub fn body(&self) -> &str {
        &self.envelope.body
    }
}
