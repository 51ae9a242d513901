//! Ledger walks shared by the orchestrator and the outcome handler.
//!
//! Each walk persists an item's marker right after its hold moves. Hold calls
//! are idempotent per order line, so a redelivered message can repeat the
//! ledger call for an item whose marker append failed.

use std::time::Instant;

use common::{OrderId, ProductId};
use domain::{
    AllocationStatus, CancelOrder, ConfirmItem, ConfirmOrder, Order, OrderService, ReleaseItem,
};
use event_store::EventStore;
use inventory::{HoldKey, InventoryLedger};

use crate::error::{Result, SagaError};

pub(crate) const STEP_RESERVE: &str = "reserve";
pub(crate) const STEP_REQUEST_PAYMENT: &str = "request_payment";
pub(crate) const STEP_CONFIRM: &str = "confirm";
pub(crate) const STEP_RELEASE: &str = "release";

pub(crate) fn record_step(step: &'static str, started: Instant) {
    metrics::histogram!("saga_step_duration_seconds", "step" => step)
        .record(started.elapsed().as_secs_f64());
}

/// Order access plus the ledger, as used by every saga handler.
pub(crate) struct SagaSteps<S: EventStore, L> {
    pub(crate) orders: OrderService<S>,
    pub(crate) ledger: L,
}

impl<S, L> SagaSteps<S, L>
where
    S: EventStore,
    L: InventoryLedger,
{
    pub(crate) fn new(store: S, ledger: L) -> Self {
        Self {
            orders: OrderService::new(store),
            ledger,
        }
    }

    pub(crate) async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(SagaError::UnknownOrder(order_id))
    }

    /// Returns every held item to stock, newest first, then cancels the order.
    ///
    /// Unreserved items are released too: their hold may have committed
    /// before a failed marker append.
    pub(crate) async fn release_all(&self, order_id: OrderId, order: Order) -> Result<Order> {
        let started = Instant::now();
        let cause = order.state().as_str();
        let reason = order.failure_reason().unwrap_or(cause).to_string();

        let outstanding: Vec<(ProductId, AllocationStatus)> = order
            .items()
            .iter()
            .rev()
            .filter(|item| {
                matches!(
                    item.allocation,
                    AllocationStatus::Reserved | AllocationStatus::Unreserved
                )
            })
            .map(|item| (item.product_id.clone(), item.allocation))
            .collect();

        for (product_id, allocation) in outstanding {
            let key = HoldKey::new(order_id, product_id.clone());
            let released = self.ledger.release_hold(&key).await?;
            if allocation == AllocationStatus::Reserved {
                self.orders
                    .release_item(ReleaseItem::new(order_id, product_id))
                    .await?;
            } else if released.is_some() {
                tracing::warn!(%order_id, %product_id, "Released hold with no reservation marker");
            }
        }

        let order = self
            .orders
            .cancel_order(CancelOrder::new(order_id, reason.clone()))
            .await?
            .aggregate;
        record_step(STEP_RELEASE, started);

        metrics::counter!("saga_orders_cancelled_total", "reason" => cause).increment(1);
        tracing::info!(%order_id, %reason, "Order cancelled");
        Ok(order)
    }

    /// Turns every hold into a permanent deduction, then confirms the order.
    pub(crate) async fn confirm_all(&self, order_id: OrderId, order: Order) -> Result<Order> {
        let started = Instant::now();

        let held: Vec<ProductId> = order
            .reserved_items()
            .map(|item| item.product_id.clone())
            .collect();

        for product_id in held {
            self.ledger
                .confirm_hold(&HoldKey::new(order_id, product_id.clone()))
                .await?;
            self.orders
                .confirm_item(ConfirmItem::new(order_id, product_id))
                .await?;
        }

        let order = self
            .orders
            .confirm_order(ConfirmOrder::new(order_id))
            .await?
            .aggregate;
        record_step(STEP_CONFIRM, started);

        metrics::counter!("saga_orders_confirmed_total").increment(1);
        tracing::info!(%order_id, "Order confirmed");
        Ok(order)
    }
}
