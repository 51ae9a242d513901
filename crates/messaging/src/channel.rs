use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::{Message, encode};
use crate::{Delivery, MessageId, ReceiptHandle, Result};

/// Queue names used by the checkout pipeline.
pub mod queues {
    pub const CHECKOUT_REQUESTED: &str = "checkout.requested";
    pub const PAYMENT_REQUESTED: &str = "payment.requested";
    pub const PAYMENT_EVENTS: &str = "payment.events";

    /// The dead-letter sibling of `queue`.
    pub fn dead_letter(queue: &str) -> String {
        format!("{queue}.dlq")
    }
}

/// Options for one receive call.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    pub max_messages: usize,

    /// How long a received message stays hidden before it is redelivered.
    pub visibility_timeout: Duration,

    /// How long to wait for a message when none is visible.
    pub wait_time: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout: Duration::from_secs(30),
            wait_time: Duration::from_secs(1),
        }
    }
}

/// An at-least-once queue with visibility timeouts and explicit acknowledgment.
///
/// Messages carry a group key; within a queue, a group's messages are handed
/// out in publish order and never more than one at a time.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn publish(&self, queue: &str, group_id: &str, body: String) -> Result<MessageId>;

    /// Leases up to `options.max_messages` visible messages, each from a
    /// distinct group. Waits up to `options.wait_time` when none is visible.
    async fn receive(&self, queue: &str, options: ReceiveOptions) -> Result<Vec<Delivery>>;

    /// Removes a delivered message for good.
    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> Result<()>;

    /// Ends a lease early so the message is visible again at once.
    async fn nack(&self, queue: &str, receipt: &ReceiptHandle) -> Result<()>;
}

#[async_trait]
impl<T: MessageChannel + ?Sized> MessageChannel for Arc<T> {
    async fn publish(&self, queue: &str, group_id: &str, body: String) -> Result<MessageId> {
        (**self).publish(queue, group_id, body).await
    }

    async fn receive(&self, queue: &str, options: ReceiveOptions) -> Result<Vec<Delivery>> {
        (**self).receive(queue, options).await
    }

    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> Result<()> {
        (**self).ack(queue, receipt).await
    }

    async fn nack(&self, queue: &str, receipt: &ReceiptHandle) -> Result<()> {
        (**self).nack(queue, receipt).await
    }
}

#[async_trait]
pub trait MessageChannelExt: MessageChannel {
    /// Encodes `message` and publishes it under its own group key.
    async fn publish_message<M: Message>(&self, queue: &str, message: &M) -> Result<MessageId> {
        let body = encode(message)?;
        self.publish(queue, &message.group_key(), body).await
    }
}

impl<T: MessageChannel + ?Sized> MessageChannelExt for T {}
