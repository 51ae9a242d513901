use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::channel::{MessageChannel, ReceiveOptions};
use crate::{ChannelError, Delivery, Envelope, MessageId, ReceiptHandle, Result};

/// Upper bound on how long an idle receive sleeps before rescanning for
/// expired leases.
const IDLE_RESCAN: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Lease {
    receipt: ReceiptHandle,
    visible_at: Instant,
}

#[derive(Debug)]
struct StoredMessage {
    envelope: Envelope,
    receive_count: u32,
    lease: Option<Lease>,
}

impl StoredMessage {
    fn is_leased(&self, now: Instant) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.visible_at > now)
    }

    /// True while `receipt` is the latest delivery of this message.
    fn holds(&self, receipt: &ReceiptHandle) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| &lease.receipt == receipt)
    }
}

#[derive(Debug, Default)]
struct Queues {
    queues: HashMap<String, VecDeque<StoredMessage>>,
}

/// In-process at-least-once channel.
///
/// Queues are created on first use. A message stays on its queue until it is
/// acknowledged; an expired lease makes it visible again with a higher
/// `receive_count`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChannel {
    state: Arc<Mutex<Queues>>,
    published: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of messages on `queue`, in flight or not.
    pub async fn depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Copies of every message on `queue`, oldest first.
    pub async fn peek(&self, queue: &str) -> Vec<Envelope> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable(
                "in-memory channel switched off".to_string(),
            ));
        }
        Ok(())
    }

    /// Leases visible messages, one per group, honouring per-group order.
    async fn lease_visible(&self, queue: &str, options: &ReceiveOptions) -> Vec<Delivery> {
        let mut state = self.state.lock().await;
        let Some(messages) = state.queues.get_mut(queue) else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut deliveries = Vec::new();

        for message in messages.iter_mut() {
            if deliveries.len() >= options.max_messages {
                break;
            }
            if blocked.contains(&message.envelope.group_id) {
                continue;
            }
            // Whatever happens to this message, later ones in its group wait.
            blocked.insert(message.envelope.group_id.clone());
            if message.is_leased(now) {
                continue;
            }

            let receipt = ReceiptHandle::new();
            message.receive_count += 1;
            message.lease = Some(Lease {
                receipt: receipt.clone(),
                visible_at: now + options.visibility_timeout,
            });
            deliveries.push(Delivery {
                envelope: message.envelope.clone(),
                receipt,
                receive_count: message.receive_count,
            });
        }

        deliveries
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn publish(&self, queue: &str, group_id: &str, body: String) -> Result<MessageId> {
        self.check_available()?;

        let envelope = Envelope {
            message_id: MessageId::new(),
            queue: queue.to_string(),
            group_id: group_id.to_string(),
            body,
            published_at: Utc::now(),
        };
        let message_id = envelope.message_id;

        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                envelope,
                receive_count: 0,
                lease: None,
            });
        self.published.notify_waiters();

        tracing::trace!(queue, group_id, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    async fn receive(&self, queue: &str, options: ReceiveOptions) -> Result<Vec<Delivery>> {
        self.check_available()?;

        let deadline = Instant::now() + options.wait_time;
        loop {
            let notified = self.published.notified();
            let deliveries = self.lease_visible(queue, &options).await;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout((deadline - now).min(IDLE_RESCAN), notified).await;
        }
    }

    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        let position = state
            .queues
            .get(queue)
            .and_then(|messages| messages.iter().position(|m| m.holds(receipt)));

        match (position, state.queues.get_mut(queue)) {
            (Some(index), Some(messages)) => {
                messages.remove(index);
                Ok(())
            }
            _ => Err(ChannelError::StaleReceipt {
                queue: queue.to_string(),
                receipt: receipt.to_string(),
            }),
        }
    }

    async fn nack(&self, queue: &str, receipt: &ReceiptHandle) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        let message = state
            .queues
            .get_mut(queue)
            .and_then(|messages| messages.iter_mut().find(|m| m.holds(receipt)));

        match message {
            Some(message) => {
                message.lease = None;
                drop(state);
                self.published.notify_waiters();
                Ok(())
            }
            None => Err(ChannelError::StaleReceipt {
                queue: queue.to_string(),
                receipt: receipt.to_string(),
            }),
        }
    }
}
