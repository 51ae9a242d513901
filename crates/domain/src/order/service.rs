//! Order service providing a simplified API for order operations.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    CancelOrder, CompleteReservation, ConfirmItem, ConfirmOrder, FailReservation, Order,
    PlaceOrder, RecordPaymentFailure, RecordPaymentSuccess, ReleaseItem, RequestPayment,
    ReserveItem,
};

/// Service for managing orders.
///
/// Each method loads the order, runs one guarded decision and appends the
/// resulting events at the loaded version.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let PlaceOrder {
            order_id,
            user_id,
            lines,
            currency,
        } = cmd;

        self.handler
            .execute(order_id, |order| {
                order.place(order_id, user_id, lines, currency)
            })
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, product_id = %cmd.product_id))]
    pub async fn reserve_item(&self, cmd: ReserveItem) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.reserve_item(&cmd.product_id))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn complete_reservation(
        &self,
        cmd: CompleteReservation,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.complete_reservation())
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn fail_reservation(
        &self,
        cmd: FailReservation,
    ) -> Result<CommandResult<Order>, DomainError> {
        let FailReservation {
            order_id,
            product_id,
            reason,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.fail_reservation(product_id, reason))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, product_id = %cmd.product_id))]
    pub async fn release_item(&self, cmd: ReleaseItem) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.release_item(&cmd.product_id))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn request_payment(
        &self,
        cmd: RequestPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.request_payment())
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn record_payment_success(
        &self,
        cmd: RecordPaymentSuccess,
    ) -> Result<CommandResult<Order>, DomainError> {
        let RecordPaymentSuccess {
            order_id,
            payment_id,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.record_payment_success(payment_id))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn record_payment_failure(
        &self,
        cmd: RecordPaymentFailure,
    ) -> Result<CommandResult<Order>, DomainError> {
        let RecordPaymentFailure { order_id, reason } = cmd;

        self.handler
            .execute(order_id, |order| order.record_payment_failure(reason))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, product_id = %cmd.product_id))]
    pub async fn confirm_item(&self, cmd: ConfirmItem) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.confirm_item(&cmd.product_id))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn confirm_order(
        &self,
        cmd: ConfirmOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.confirm())
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<CommandResult<Order>, DomainError> {
        let CancelOrder { order_id, reason } = cmd;

        self.handler
            .execute(order_id, |order| order.cancel(reason))
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }
}
