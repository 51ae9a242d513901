//! Order commands.

use common::{AggregateId, ProductId, UserId};

use crate::command::Command;

use super::{Order, OrderLine};

/// Command to place a new order from a checkout request.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// Assigned by the checkout producer, stable across redeliveries.
    pub order_id: AggregateId,

    pub user_id: UserId,

    pub lines: Vec<OrderLine>,

    pub currency: String,
}

impl PlaceOrder {
    pub fn new(
        order_id: AggregateId,
        user_id: impl Into<UserId>,
        lines: Vec<OrderLine>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            user_id: user_id.into(),
            lines,
            currency: currency.into(),
        }
    }
}

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record a successful ledger Reserve for one item.
#[derive(Debug, Clone)]
pub struct ReserveItem {
    pub order_id: AggregateId,
    pub product_id: ProductId,
}

impl ReserveItem {
    pub fn new(order_id: AggregateId, product_id: impl Into<ProductId>) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
        }
    }
}

impl Command for ReserveItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to close the reservation phase.
#[derive(Debug, Clone)]
pub struct CompleteReservation {
    pub order_id: AggregateId,
}

impl CompleteReservation {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for CompleteReservation {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to abandon the reservation phase.
#[derive(Debug, Clone)]
pub struct FailReservation {
    pub order_id: AggregateId,

    /// The item whose Reserve was rejected, if any.
    pub product_id: Option<ProductId>,

    pub reason: String,
}

impl FailReservation {
    pub fn new(
        order_id: AggregateId,
        product_id: Option<ProductId>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            product_id,
            reason: reason.into(),
        }
    }
}

impl Command for FailReservation {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record a successful ledger Release for one item.
#[derive(Debug, Clone)]
pub struct ReleaseItem {
    pub order_id: AggregateId,
    pub product_id: ProductId,
}

impl ReleaseItem {
    pub fn new(order_id: AggregateId, product_id: impl Into<ProductId>) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
        }
    }
}

impl Command for ReleaseItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record that `PaymentRequested` was published.
#[derive(Debug, Clone)]
pub struct RequestPayment {
    pub order_id: AggregateId,
}

impl RequestPayment {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for RequestPayment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct RecordPaymentSuccess {
    pub order_id: AggregateId,
    pub payment_id: Option<String>,
}

impl RecordPaymentSuccess {
    pub fn new(order_id: AggregateId, payment_id: Option<String>) -> Self {
        Self {
            order_id,
            payment_id,
        }
    }
}

impl Command for RecordPaymentSuccess {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct RecordPaymentFailure {
    pub order_id: AggregateId,
    pub reason: String,
}

impl RecordPaymentFailure {
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
        }
    }
}

impl Command for RecordPaymentFailure {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record a successful ledger Confirm for one item.
#[derive(Debug, Clone)]
pub struct ConfirmItem {
    pub order_id: AggregateId,
    pub product_id: ProductId,
}

impl ConfirmItem {
    pub fn new(order_id: AggregateId, product_id: impl Into<ProductId>) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
        }
    }
}

impl Command for ConfirmItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to finalize a paid order.
#[derive(Debug, Clone)]
pub struct ConfirmOrder {
    pub order_id: AggregateId,
}

impl ConfirmOrder {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for ConfirmOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to finalize a compensated order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub reason: String,
}

impl CancelOrder {
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
        }
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
