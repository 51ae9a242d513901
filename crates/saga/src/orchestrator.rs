//! Order saga orchestrator.
//!
//! Consumes `CheckoutRequested`, owns the order through reservation and
//! emits `PaymentRequested`. A redelivered request resumes from whatever the
//! stored order says is still outstanding.

use std::time::Instant;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use domain::{
    CompleteReservation, FailReservation, Order, OrderLine, OrderState, PlaceOrder,
    RequestPayment, ReserveItem,
};
use event_store::EventStore;
use inventory::{HoldKey, InventoryLedger, LedgerError};
use messaging::{
    CheckoutRequested, Handled, HandlerError, MessageChannel, MessageChannelExt, MessageHandler,
    PaymentRequested, queues,
};

use crate::catalog::PriceCatalog;
use crate::error::{Result, SagaError};
use crate::steps::{self, SagaSteps};

pub const REASON_UNKNOWN_PRODUCT: &str = "unknown product";
pub const REASON_INSUFFICIENT_STOCK: &str = "insufficient stock";

/// Drives an order from checkout to `payment_requested`, or to `cancelled`
/// when stock cannot be held.
pub struct OrderSagaOrchestrator<S: EventStore, L, C, P> {
    steps: SagaSteps<S, L>,
    channel: C,
    catalog: P,
    currency: String,
}

impl<S, L, C, P> OrderSagaOrchestrator<S, L, C, P>
where
    S: EventStore,
    L: InventoryLedger,
    C: MessageChannel,
    P: PriceCatalog,
{
    pub fn new(store: S, ledger: L, channel: C, catalog: P) -> Self {
        Self {
            steps: SagaSteps::new(store, ledger),
            channel,
            catalog,
            currency: "USD".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Runs or resumes the saga for one checkout request.
    pub async fn process(&self, request: CheckoutRequested) -> Result<Handled> {
        let order_id = request.order_id;

        let order = match self.steps.orders.get_order(order_id).await? {
            None => self.place(&request).await?,
            Some(order) => {
                if let Some(owner) = order.user_id().filter(|owner| **owner != request.user_id) {
                    tracing::error!(%order_id, %owner, claimed_by = %request.user_id, "Order ID reused by another user");
                    return Err(SagaError::UserMismatch {
                        order_id,
                        owner: owner.clone(),
                        claimed_by: request.user_id,
                    });
                }
                if !Self::has_work(order.state()) {
                    tracing::info!(%order_id, state = %order.state(), "Duplicate checkout request");
                    return Ok(Handled::Duplicate);
                }
                tracing::info!(%order_id, state = %order.state(), "Resuming saga");
                order
            }
        };

        self.drive(order_id, order).await?;
        Ok(Handled::Applied)
    }

    fn has_work(state: OrderState) -> bool {
        matches!(
            state,
            OrderState::Pending
                | OrderState::Reserving
                | OrderState::Reserved
                | OrderState::ReservationFailed
        )
    }

    async fn place(&self, request: &CheckoutRequested) -> Result<Order> {
        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            // Unpriced products are caught before reserving; zero keeps the order valid.
            let price = self
                .catalog
                .unit_price(&item.product_id)
                .await
                .unwrap_or_default();
            lines.push(OrderLine::new(item.product_id.clone(), item.quantity, price));
        }

        let order = self
            .steps
            .orders
            .place_order(PlaceOrder::new(
                request.order_id,
                request.user_id.clone(),
                lines,
                self.currency.clone(),
            ))
            .await?
            .aggregate;

        metrics::counter!("saga_orders_placed_total").increment(1);
        tracing::info!(order_id = %request.order_id, total = %order.total(), "Order placed");
        Ok(order)
    }

    /// Advances the order until it waits on payment or reaches a terminal state.
    async fn drive(&self, order_id: OrderId, mut order: Order) -> Result<()> {
        loop {
            order = match order.state() {
                // Placing appends `ReservationStarted` with `OrderPlaced`, so
                // pending is never stored on its own.
                OrderState::Pending | OrderState::Reserving => {
                    self.reserve_items(order_id, order).await?
                }
                OrderState::Reserved => self.request_payment(order_id, order).await?,
                OrderState::ReservationFailed => self.steps.release_all(order_id, order).await?,
                OrderState::PaymentRequested
                | OrderState::Paid
                | OrderState::PaymentFailed
                | OrderState::Confirmed
                | OrderState::Cancelled => return Ok(()),
            };
        }
    }

    /// Reserves every unreserved item in ascending product order.
    async fn reserve_items(&self, order_id: OrderId, order: Order) -> Result<Order> {
        let started = Instant::now();

        if let Some(product_id) = self.first_unpriced(&order).await {
            tracing::warn!(%order_id, %product_id, "Product has no price");
            return self
                .abort_reservation(order_id, product_id, REASON_UNKNOWN_PRODUCT)
                .await;
        }

        let pending: Vec<(ProductId, u32)> = order
            .unreserved_items()
            .map(|item| (item.product_id.clone(), item.quantity))
            .collect();

        for (product_id, quantity) in pending {
            let key = HoldKey::new(order_id, product_id.clone());
            let reason = match self.steps.ledger.reserve_hold(&key, quantity).await {
                Ok(_) => {
                    self.steps
                        .orders
                        .reserve_item(ReserveItem::new(order_id, product_id))
                        .await?;
                    continue;
                }
                Err(LedgerError::InsufficientStock { .. }) => REASON_INSUFFICIENT_STOCK,
                Err(LedgerError::UnknownProduct { .. }) => REASON_UNKNOWN_PRODUCT,
                Err(err) => return Err(err.into()),
            };

            tracing::info!(%order_id, %product_id, %reason, "Reservation failed");
            return self.abort_reservation(order_id, product_id, reason).await;
        }

        let order = self
            .steps
            .orders
            .complete_reservation(CompleteReservation::new(order_id))
            .await?
            .aggregate;
        steps::record_step(steps::STEP_RESERVE, started);
        tracing::info!(%order_id, items = order.items().len(), "Inventory reserved");
        Ok(order)
    }

    async fn first_unpriced(&self, order: &Order) -> Option<ProductId> {
        for item in order.unreserved_items() {
            if self.catalog.unit_price(&item.product_id).await.is_none() {
                return Some(item.product_id.clone());
            }
        }
        None
    }

    async fn abort_reservation(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        reason: &str,
    ) -> Result<Order> {
        let order = self
            .steps
            .orders
            .fail_reservation(FailReservation::new(order_id, Some(product_id), reason))
            .await?
            .aggregate;
        self.steps.release_all(order_id, order).await
    }

    /// Publishes the payment request, then records that it went out.
    ///
    /// A crash in between republishes on redelivery; the processor charges
    /// once per idempotency key.
    async fn request_payment(&self, order_id: OrderId, order: Order) -> Result<Order> {
        let started = Instant::now();
        let user_id = order
            .user_id()
            .cloned()
            .ok_or(SagaError::UnknownOrder(order_id))?;

        let request = PaymentRequested {
            order_id,
            user_id,
            amount: order.total(),
            currency: order.currency().to_string(),
            idempotency_key: Some(order_id.to_string()),
        };
        self.channel
            .publish_message(queues::PAYMENT_REQUESTED, &request)
            .await?;

        let order = self
            .steps
            .orders
            .request_payment(RequestPayment::new(order_id))
            .await?
            .aggregate;
        steps::record_step(steps::STEP_REQUEST_PAYMENT, started);
        tracing::info!(%order_id, amount = %request.amount, "Payment requested");
        Ok(order)
    }
}

#[async_trait]
impl<S, L, C, P> MessageHandler for OrderSagaOrchestrator<S, L, C, P>
where
    S: EventStore + 'static,
    L: InventoryLedger + 'static,
    C: MessageChannel + 'static,
    P: PriceCatalog + 'static,
{
    type Message = CheckoutRequested;

    #[tracing::instrument(skip(self, message), fields(order_id = %message.order_id))]
    async fn handle(&self, message: CheckoutRequested) -> std::result::Result<Handled, HandlerError> {
        self.process(message).await.map_err(HandlerError::from)
    }
}
