//! Message channel and consumption contract for the checkout pipeline.
//!
//! This crate provides:
//! - The message contracts (`CheckoutRequested`, `PaymentRequested`, `PaymentEvent`)
//! - The `MessageChannel` trait: at-least-once delivery with visibility timeouts,
//!   per-group ordering and explicit acknowledgment
//! - `InMemoryChannel`, an in-process implementation
//! - `Consumer`, the shared receive-handle-ack loop with retry and dead-lettering

pub mod channel;
pub mod consumer;
mod envelope;
mod error;
mod memory;
pub mod message;

pub use channel::{MessageChannel, MessageChannelExt, ReceiveOptions, queues};
pub use consumer::{Consumer, ConsumerConfig, Handled, HandlerError, MessageHandler};
pub use envelope::{Delivery, Envelope, MessageId, ReceiptHandle};
pub use error::{ChannelError, Result};
pub use memory::InMemoryChannel;
pub use message::{
    CheckoutItem, CheckoutRequested, Message, MessageError, PaymentEvent, PaymentOutcome,
    PaymentRequested,
};
