//! Payment outcome handler.
//!
//! Consumes `PaymentEvent` and settles the order: confirm every hold on
//! success, release every hold on failure.

use async_trait::async_trait;
use domain::{OrderState, RecordPaymentFailure, RecordPaymentSuccess};
use event_store::EventStore;
use inventory::InventoryLedger;
use messaging::{Handled, HandlerError, MessageHandler, PaymentEvent};

use crate::error::{Result, SagaError};
use crate::steps::SagaSteps;

const DEFAULT_DECLINE_REASON: &str = "payment failed";

pub struct PaymentOutcomeHandler<S: EventStore, L> {
    steps: SagaSteps<S, L>,
}

impl<S, L> PaymentOutcomeHandler<S, L>
where
    S: EventStore,
    L: InventoryLedger,
{
    pub fn new(store: S, ledger: L) -> Self {
        Self {
            steps: SagaSteps::new(store, ledger),
        }
    }

    pub async fn process(&self, event: PaymentEvent) -> Result<Handled> {
        let order_id = event.order_id;
        let order = self.steps.load(order_id).await?;

        if let Some(owner) = order.user_id().filter(|owner| **owner != event.user_id) {
            tracing::error!(%order_id, %owner, claimed_by = %event.user_id, "Payment outcome for another user's order");
            return Err(SagaError::UserMismatch {
                order_id,
                owner: owner.clone(),
                claimed_by: event.user_id,
            });
        }

        let succeeded = event.is_success();
        match (order.state(), succeeded) {
            (OrderState::Confirmed | OrderState::Cancelled, _) => {
                tracing::info!(%order_id, state = %order.state(), "Order already settled");
                Ok(Handled::Duplicate)
            }
            (state @ (OrderState::Pending | OrderState::Reserving | OrderState::Reserved), _) => {
                Err(SagaError::OutOfOrder { order_id, state })
            }
            (OrderState::ReservationFailed, _) => {
                tracing::info!(%order_id, "Payment outcome for an order that never reserved stock");
                Ok(Handled::Duplicate)
            }
            (OrderState::PaymentRequested, true) => {
                let order = self
                    .steps
                    .orders
                    .record_payment_success(RecordPaymentSuccess::new(
                        order_id,
                        event.payment_id.clone(),
                    ))
                    .await?
                    .aggregate;
                self.steps.confirm_all(order_id, order).await?;
                Ok(Handled::Applied)
            }
            (OrderState::PaymentRequested, false) => {
                let reason = event
                    .reason
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DECLINE_REASON.to_string());
                let order = self
                    .steps
                    .orders
                    .record_payment_failure(RecordPaymentFailure::new(order_id, reason))
                    .await?
                    .aggregate;
                self.steps.release_all(order_id, order).await?;
                Ok(Handled::Applied)
            }
            (OrderState::Paid, true) => {
                tracing::info!(%order_id, "Resuming confirmation");
                self.steps.confirm_all(order_id, order).await?;
                Ok(Handled::Applied)
            }
            (OrderState::PaymentFailed, false) => {
                tracing::info!(%order_id, "Resuming release");
                self.steps.release_all(order_id, order).await?;
                Ok(Handled::Applied)
            }
            (state @ (OrderState::Paid | OrderState::PaymentFailed), _) => {
                tracing::error!(
                    %order_id,
                    %state,
                    outcome = ?event.outcome,
                    "Conflicting payment outcome ignored"
                );
                Ok(Handled::Duplicate)
            }
        }
    }
}

#[async_trait]
impl<S, L> MessageHandler for PaymentOutcomeHandler<S, L>
where
    S: EventStore + 'static,
    L: InventoryLedger + 'static,
{
    type Message = PaymentEvent;

    #[tracing::instrument(skip(self, message), fields(order_id = %message.order_id, outcome = ?message.outcome))]
    async fn handle(&self, message: PaymentEvent) -> std::result::Result<Handled, HandlerError> {
        self.process(message).await.map_err(HandlerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryPriceCatalog;
    use crate::orchestrator::OrderSagaOrchestrator;
    use common::{Money, OrderId, ProductId, UserId};
    use domain::{AllocationStatus, Order};
    use event_store::InMemoryEventStore;
    use inventory::InMemoryInventoryLedger;
    use messaging::{CheckoutItem, CheckoutRequested, InMemoryChannel, PaymentRequested};

    struct Harness {
        handler: PaymentOutcomeHandler<InMemoryEventStore, InMemoryInventoryLedger>,
        orchestrator: OrderSagaOrchestrator<
            InMemoryEventStore,
            InMemoryInventoryLedger,
            InMemoryChannel,
            InMemoryPriceCatalog,
        >,
        ledger: InMemoryInventoryLedger,
    }

    async fn harness() -> Harness {
        let store = InMemoryEventStore::new();
        let ledger = InMemoryInventoryLedger::new();
        let catalog = InMemoryPriceCatalog::from_prices([
            (ProductId::new("SKU-A"), Money::from_cents(500)),
            (ProductId::new("SKU-B"), Money::from_cents(300)),
        ]);
        for product in ["SKU-A", "SKU-B"] {
            ledger
                .register_product(&ProductId::new(product), 10, 0)
                .await
                .unwrap();
        }

        Harness {
            handler: PaymentOutcomeHandler::new(store.clone(), ledger.clone()),
            orchestrator: OrderSagaOrchestrator::new(
                store,
                ledger.clone(),
                InMemoryChannel::new(),
                catalog,
            ),
            ledger,
        }
    }

    impl Harness {
        /// Runs a checkout up to `payment_requested`.
        async fn awaiting_payment(&self) -> PaymentRequested {
            let checkout = CheckoutRequested::new(
                OrderId::new(),
                "user-1",
                vec![CheckoutItem::new("SKU-A", 2), CheckoutItem::new("SKU-B", 1)],
            );
            let order_id = checkout.order_id;
            self.orchestrator.process(checkout).await.unwrap();

            PaymentRequested {
                order_id,
                user_id: UserId::new("user-1"),
                amount: Money::from_cents(1300),
                currency: "USD".to_string(),
                idempotency_key: None,
            }
        }

        async fn order(&self, order_id: OrderId) -> Order {
            self.handler.steps.load(order_id).await.unwrap()
        }

        async fn counters(&self, product_id: &str) -> (u32, u32) {
            let record = self
                .ledger
                .record(&ProductId::new(product_id))
                .await
                .unwrap()
                .unwrap();
            (record.available, record.reserved)
        }
    }

    #[tokio::test]
    async fn test_success_confirms_every_item() {
        let h = harness().await;
        let request = h.awaiting_payment().await;

        let handled = h
            .handler
            .process(PaymentEvent::succeeded(&request, "PAY-0001"))
            .await
            .unwrap();
        assert_eq!(handled, Handled::Applied);

        let order = h.order(request.order_id).await;
        assert_eq!(order.state(), OrderState::Confirmed);
        assert_eq!(order.payment_id(), Some("PAY-0001"));
        assert!(
            order
                .items()
                .iter()
                .all(|item| item.allocation == AllocationStatus::Confirmed)
        );
        assert_eq!(h.counters("SKU-A").await, (8, 0));
        assert_eq!(h.counters("SKU-B").await, (9, 0));
    }

    #[tokio::test]
    async fn test_failure_releases_every_item() {
        let h = harness().await;
        let request = h.awaiting_payment().await;

        h.handler
            .process(PaymentEvent::failed(&request, "card declined"))
            .await
            .unwrap();

        let order = h.order(request.order_id).await;
        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.failure_reason(), Some("card declined"));
        assert!(
            order
                .items()
                .iter()
                .all(|item| item.allocation == AllocationStatus::Released)
        );
        assert_eq!(h.counters("SKU-A").await, (10, 0));
        assert_eq!(h.counters("SKU-B").await, (10, 0));
    }

    #[tokio::test]
    async fn test_duplicate_outcome_after_settlement_is_a_no_op() {
        let h = harness().await;
        let request = h.awaiting_payment().await;
        let event = PaymentEvent::succeeded(&request, "PAY-0001");

        h.handler.process(event.clone()).await.unwrap();
        let handled = h.handler.process(event).await.unwrap();

        assert_eq!(handled, Handled::Duplicate);
        assert_eq!(h.counters("SKU-A").await, (8, 0));
    }

    #[tokio::test]
    async fn test_conflicting_outcome_is_ignored_and_success_resumes() {
        let h = harness().await;
        let request = h.awaiting_payment().await;
        let order_id = request.order_id;

        // Payment recorded, crash before any confirmation.
        h.handler
            .steps
            .orders
            .record_payment_success(RecordPaymentSuccess::new(
                order_id,
                Some("PAY-0001".to_string()),
            ))
            .await
            .unwrap();

        let conflicting = h
            .handler
            .process(PaymentEvent::failed(&request, "late decline"))
            .await
            .unwrap();
        assert_eq!(conflicting, Handled::Duplicate);
        assert_eq!(h.order(order_id).await.state(), OrderState::Paid);
        assert_eq!(h.counters("SKU-A").await, (8, 2));

        h.handler
            .process(PaymentEvent::succeeded(&request, "PAY-0001"))
            .await
            .unwrap();
        assert_eq!(h.order(order_id).await.state(), OrderState::Confirmed);
        assert_eq!(h.counters("SKU-A").await, (8, 0));
    }

    #[tokio::test]
    async fn test_unknown_order_is_discarded() {
        let h = harness().await;
        let stray = PaymentRequested {
            order_id: OrderId::new(),
            user_id: UserId::new("user-1"),
            amount: Money::from_cents(100),
            currency: "USD".to_string(),
            idempotency_key: None,
        };

        let result = h
            .handler
            .handle(PaymentEvent::succeeded(&stray, "PAY-0001"))
            .await;
        assert!(matches!(result, Err(HandlerError::Discard(_))));
    }

    #[tokio::test]
    async fn test_early_outcome_is_retried_later() {
        let h = harness().await;
        let request = h.awaiting_payment().await;
        let early = PaymentRequested {
            order_id: OrderId::new(),
            ..request
        };

        // Place an order that stops at `reserved`.
        let channel = InMemoryChannel::new();
        channel.set_unavailable(true);
        let stalled = OrderSagaOrchestrator::new(
            h.handler.steps.orders.handler().store().clone(),
            h.ledger.clone(),
            channel,
            InMemoryPriceCatalog::from_prices([(ProductId::new("SKU-A"), Money::from_cents(500))]),
        );
        let checkout =
            CheckoutRequested::new(early.order_id, "user-1", vec![CheckoutItem::new("SKU-A", 1)]);
        assert!(stalled.process(checkout).await.is_err());

        let result = h
            .handler
            .handle(PaymentEvent::succeeded(&early, "PAY-0002"))
            .await;
        assert!(matches!(result, Err(HandlerError::Transient(_))));
        assert_eq!(h.order(early.order_id).await.state(), OrderState::Reserved);
    }

    #[tokio::test]
    async fn test_ledger_invariant_violation_is_dead_lettered() {
        let h = harness().await;
        let request = h.awaiting_payment().await;

        // Someone released SKU-B's hold behind the saga's back.
        h.ledger
            .release(&ProductId::new("SKU-B"), 1)
            .await
            .unwrap();

        let result = h
            .handler
            .handle(PaymentEvent::succeeded(&request, "PAY-0001"))
            .await;
        assert!(matches!(result, Err(HandlerError::DeadLetter(_))));

        let order = h.order(request.order_id).await;
        assert_eq!(order.state(), OrderState::Paid);
        assert_eq!(h.counters("SKU-B").await, (10, 0));
    }
}
