//! The consume-process-ack loop shared by every worker in the pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::watch;

use crate::channel::{MessageChannel, ReceiveOptions, queues};
use crate::message::{Message, decode};
use crate::{ChannelError, Delivery};

/// Successful handling; either way the message is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The message changed state.
    Applied,

    /// The message was already applied, or its order is terminal.
    Duplicate,
}

/// A failed handling, classified by what should happen to the message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Leave unacknowledged; it is redelivered after the visibility timeout.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Acknowledge and drop: the message can never be processed.
    #[error("Discarded: {0}")]
    Discard(String),

    /// Copy to the dead-letter queue, then acknowledge.
    #[error("Dead-lettered: {0}")]
    DeadLetter(String),
}

impl HandlerError {
    fn outcome(&self) -> &'static str {
        match self {
            HandlerError::Transient(_) => "retry",
            HandlerError::Discard(_) => "discarded",
            HandlerError::DeadLetter(_) => "dead_lettered",
        }
    }
}

/// Business logic for one queue.
///
/// Implementations must be idempotent: the same message can arrive more
/// than once.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Message: Message;

    async fn handle(&self, message: Self::Message) -> Result<Handled, HandlerError>;
}

/// Consumer loop settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,

    /// Deliveries beyond this count go straight to the dead-letter queue.
    pub max_receive_count: u32,

    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            batch_size: 10,
            visibility_timeout: Duration::from_secs(30),
            wait_time: Duration::from_secs(1),
            max_receive_count: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_max_receive_count(mut self, max: u32) -> Self {
        self.max_receive_count = max;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.batch_size,
            visibility_timeout: self.visibility_timeout,
            wait_time: self.wait_time,
        }
    }
}

/// Pulls batches from one queue and routes each message's fate by the
/// handler's result.
pub struct Consumer<C, H> {
    channel: C,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<C, H> Consumer<C, H>
where
    C: MessageChannel,
    H: MessageHandler,
{
    pub fn new(channel: C, handler: Arc<H>, config: ConsumerConfig) -> Self {
        Self {
            channel,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Runs until `shutdown` flips to true.
    ///
    /// Shutdown only interrupts the wait for new messages. A batch that was
    /// received is always processed to the end before the flag is checked
    /// again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.config.queue.as_str();
        let mut backoff = self.config.initial_backoff;
        tracing::info!(queue, "Consumer started");

        while !*shutdown.borrow() {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.channel.receive(queue, self.config.receive_options()) => received,
            };

            match received {
                Ok(deliveries) => {
                    backoff = self.config.initial_backoff;
                    self.process_batch(deliveries).await;
                }
                Err(err) => {
                    tracing::warn!(queue, error = %err, backoff_ms = backoff.as_millis() as u64, "Receive failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }

        tracing::info!(queue, "Consumer stopped");
    }

    /// Receives one batch and processes it. Returns how many messages were
    /// received.
    pub async fn poll_once(&self) -> Result<usize, ChannelError> {
        let deliveries = self
            .channel
            .receive(&self.config.queue, self.config.receive_options())
            .await?;
        let count = deliveries.len();
        self.process_batch(deliveries).await;
        Ok(count)
    }

    async fn process_batch(&self, deliveries: Vec<Delivery>) {
        // Every delivery in a batch has a distinct group, so they can run together.
        join_all(deliveries.into_iter().map(|delivery| self.process(delivery))).await;
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(queue = %self.config.queue, message_id = %delivery.message_id(), receive_count = delivery.receive_count)
    )]
    async fn process(&self, delivery: Delivery) {
        let queue = self.config.queue.as_str();

        if delivery.receive_count > self.config.max_receive_count {
            self.dead_letter(&delivery, "receive count exceeded").await;
            return;
        }

        let message = match decode::<H::Message>(delivery.body()) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "Discarding malformed message");
                self.acknowledge(&delivery, "discarded").await;
                return;
            }
        };

        let started = Instant::now();
        let result = self.handler.handle(message).await;
        metrics::histogram!("message_handle_seconds", "queue" => queue.to_string())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Handled::Applied) => self.acknowledge(&delivery, "applied").await,
            Ok(Handled::Duplicate) => {
                tracing::debug!("Duplicate or terminal; acknowledging");
                self.acknowledge(&delivery, "duplicate").await;
            }
            Err(err @ HandlerError::Transient(_)) => {
                tracing::warn!(error = %err, "Leaving message for redelivery");
                count(queue, err.outcome());
            }
            Err(err @ HandlerError::Discard(_)) => {
                tracing::error!(error = %err, "Discarding poison message");
                self.acknowledge(&delivery, err.outcome()).await;
            }
            Err(HandlerError::DeadLetter(reason)) => {
                self.dead_letter(&delivery, &reason).await;
            }
        }
    }

    async fn acknowledge(&self, delivery: &Delivery, outcome: &'static str) {
        count(&self.config.queue, outcome);
        if let Err(err) = self
            .channel
            .ack(&self.config.queue, &delivery.receipt)
            .await
        {
            // The message will come back and be absorbed as a duplicate.
            tracing::warn!(error = %err, "Acknowledge failed");
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) {
        let queue = self.config.queue.as_str();
        let dlq = queues::dead_letter(queue);

        if let Err(err) = self
            .channel
            .publish(
                &dlq,
                &delivery.envelope.group_id,
                delivery.envelope.body.clone(),
            )
            .await
        {
            tracing::warn!(error = %err, "Dead-letter publish failed; leaving message for redelivery");
            count(queue, "retry");
            return;
        }

        tracing::error!(reason, dlq = %dlq, "Message dead-lettered");
        metrics::counter!("messages_dead_lettered_total", "queue" => queue.to_string())
            .increment(1);
        self.acknowledge(delivery, "dead_lettered").await;
    }
}

fn count(queue: &str, outcome: &'static str) {
    metrics::counter!(
        "messages_consumed_total",
        "queue" => queue.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
