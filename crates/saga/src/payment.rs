//! Payment processor worker and the gateway it charges through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, UserId};
use messaging::{
    Handled, HandlerError, MessageChannel, MessageChannelExt, MessageHandler, PaymentEvent,
    PaymentRequested, queues,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::SagaError;

/// A charge the gateway accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub payment_id: String,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
}

/// What the gateway decided about a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved(Charge),
    Declined(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Trait for the external payment provider.
///
/// Charges are keyed by an idempotency key: repeating a key must never charge
/// twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        idempotency_key: &str,
        user_id: &UserId,
        amount: Money,
        currency: &str,
    ) -> Result<ChargeOutcome, GatewayError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn charge(
        &self,
        idempotency_key: &str,
        user_id: &UserId,
        amount: Money,
        currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        (**self)
            .charge(idempotency_key, user_id, amount, currency)
            .await
    }
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    /// First decision per idempotency key, declines included.
    outcomes: HashMap<String, ChargeOutcome>,
    next_id: u32,
    decline_reason: Option<String>,
    unavailable: bool,
    attempts: usize,
}

/// In-memory payment gateway for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every new charge with `reason` until cleared with `None`.
    ///
    /// Keys already decided keep their first outcome either way.
    pub async fn set_decline(&self, reason: Option<String>) {
        self.state.lock().await.decline_reason = reason;
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Number of distinct charges taken.
    pub async fn charge_count(&self) -> usize {
        self.state
            .lock()
            .await
            .outcomes
            .values()
            .filter(|outcome| matches!(outcome, ChargeOutcome::Approved(_)))
            .count()
    }

    /// Number of charge calls that reached the gateway, repeats included.
    pub async fn attempt_count(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn charge_for(&self, idempotency_key: &str) -> Option<Charge> {
        match self.state.lock().await.outcomes.get(idempotency_key) {
            Some(ChargeOutcome::Approved(charge)) => Some(charge.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(
        &self,
        idempotency_key: &str,
        user_id: &UserId,
        amount: Money,
        currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let mut state = self.state.lock().await;

        if state.unavailable {
            return Err(GatewayError::Unavailable(
                "in-memory gateway switched off".to_string(),
            ));
        }
        state.attempts += 1;

        if let Some(existing) = state.outcomes.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let outcome = match state.decline_reason.clone() {
            Some(reason) => ChargeOutcome::Declined(reason),
            None => {
                state.next_id += 1;
                ChargeOutcome::Approved(Charge {
                    payment_id: format!("PAY-{:04}", state.next_id),
                    user_id: user_id.clone(),
                    amount,
                    currency: currency.to_string(),
                })
            }
        };
        state
            .outcomes
            .insert(idempotency_key.to_string(), outcome.clone());

        Ok(outcome)
    }
}

/// Worker that turns `PaymentRequested` into a `PaymentEvent`.
pub struct PaymentProcessor<C, G> {
    channel: C,
    gateway: G,
}

impl<C, G> PaymentProcessor<C, G>
where
    C: MessageChannel,
    G: PaymentGateway,
{
    pub fn new(channel: C, gateway: G) -> Self {
        Self { channel, gateway }
    }

    async fn process(&self, request: PaymentRequested) -> Result<Handled, SagaError> {
        let key = request.charge_key();
        let outcome = self
            .gateway
            .charge(&key, &request.user_id, request.amount, &request.currency)
            .await?;

        let event = match outcome {
            ChargeOutcome::Approved(charge) => {
                tracing::info!(payment_id = %charge.payment_id, "Payment approved");
                metrics::counter!("payment_charges_total", "outcome" => "approved").increment(1);
                PaymentEvent::succeeded(&request, charge.payment_id)
            }
            ChargeOutcome::Declined(reason) => {
                tracing::info!(%reason, "Payment declined");
                metrics::counter!("payment_charges_total", "outcome" => "declined").increment(1);
                PaymentEvent::failed(&request, reason)
            }
        };

        self.channel
            .publish_message(queues::PAYMENT_EVENTS, &event)
            .await?;
        Ok(Handled::Applied)
    }
}

#[async_trait]
impl<C, G> MessageHandler for PaymentProcessor<C, G>
where
    C: MessageChannel + 'static,
    G: PaymentGateway + 'static,
{
    type Message = PaymentRequested;

    #[tracing::instrument(skip(self, message), fields(order_id = %message.order_id))]
    async fn handle(&self, message: PaymentRequested) -> Result<Handled, HandlerError> {
        self.process(message).await.map_err(HandlerError::from)
    }
}
