//! Order domain events.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::OrderLine;

/// Events recorded against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order created from a checkout request.
    OrderPlaced(OrderPlacedData),

    /// Reservation of line items began.
    ReservationStarted(TransitionData),

    /// One line item's stock hold succeeded.
    ItemReserved(ItemAllocationData),

    /// Every line item is held.
    InventoryReserved(TransitionData),

    /// A reservation could not be made; compensation follows.
    ReservationFailed(ReservationFailedData),

    /// One line item's hold was returned to sellable stock.
    ItemReleased(ItemAllocationData),

    /// `PaymentRequested` was published.
    PaymentRequested(PaymentRequestedData),

    PaymentSucceeded(PaymentSucceededData),

    PaymentFailed(PaymentFailedData),

    /// One line item's hold became a permanent deduction.
    ItemConfirmed(ItemAllocationData),

    /// All holds confirmed.
    OrderConfirmed(TransitionData),

    /// All holds released.
    OrderCancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::ReservationStarted(_) => "ReservationStarted",
            OrderEvent::ItemReserved(_) => "ItemReserved",
            OrderEvent::InventoryReserved(_) => "InventoryReserved",
            OrderEvent::ReservationFailed(_) => "ReservationFailed",
            OrderEvent::ItemReleased(_) => "ItemReleased",
            OrderEvent::PaymentRequested(_) => "PaymentRequested",
            OrderEvent::PaymentSucceeded(_) => "PaymentSucceeded",
            OrderEvent::PaymentFailed(_) => "PaymentFailed",
            OrderEvent::ItemConfirmed(_) => "ItemConfirmed",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Sorted by product ID, duplicates merged.
    pub lines: Vec<OrderLine>,
    pub currency: String,
    pub total: Money,
    pub placed_at: DateTime<Utc>,
}

/// Payload for events that only move the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionData {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAllocationData {
    pub product_id: ProductId,
    pub quantity: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationFailedData {
    /// The item whose reservation failed, if a specific one did.
    pub product_id: Option<ProductId>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestedData {
    pub amount: Money,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceededData {
    pub payment_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub at: DateTime<Utc>,
}

// Convenience constructors
impl OrderEvent {
    pub fn order_placed(
        order_id: OrderId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        currency: impl Into<String>,
        total: Money,
    ) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            user_id,
            lines,
            currency: currency.into(),
            total,
            placed_at: Utc::now(),
        })
    }

    pub fn reservation_started() -> Self {
        OrderEvent::ReservationStarted(TransitionData { at: Utc::now() })
    }

    pub fn item_reserved(product_id: ProductId, quantity: u32) -> Self {
        OrderEvent::ItemReserved(ItemAllocationData {
            product_id,
            quantity,
            at: Utc::now(),
        })
    }

    pub fn inventory_reserved() -> Self {
        OrderEvent::InventoryReserved(TransitionData { at: Utc::now() })
    }

    pub fn reservation_failed(product_id: Option<ProductId>, reason: impl Into<String>) -> Self {
        OrderEvent::ReservationFailed(ReservationFailedData {
            product_id,
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    pub fn item_released(product_id: ProductId, quantity: u32) -> Self {
        OrderEvent::ItemReleased(ItemAllocationData {
            product_id,
            quantity,
            at: Utc::now(),
        })
    }

    pub fn payment_requested(amount: Money) -> Self {
        OrderEvent::PaymentRequested(PaymentRequestedData {
            amount,
            at: Utc::now(),
        })
    }

    pub fn payment_succeeded(payment_id: Option<String>) -> Self {
        OrderEvent::PaymentSucceeded(PaymentSucceededData {
            payment_id,
            at: Utc::now(),
        })
    }

    pub fn payment_failed(reason: impl Into<String>) -> Self {
        OrderEvent::PaymentFailed(PaymentFailedData {
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    pub fn item_confirmed(product_id: ProductId, quantity: u32) -> Self {
        OrderEvent::ItemConfirmed(ItemAllocationData {
            product_id,
            quantity,
            at: Utc::now(),
        })
    }

    pub fn order_confirmed() -> Self {
        OrderEvent::OrderConfirmed(TransitionData { at: Utc::now() })
    }

    pub fn order_cancelled(reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placed_event_carries_total() {
        let event = OrderEvent::order_placed(
            OrderId::new(),
            UserId::new("u-1"),
            vec![
                OrderLine::new("SKU-A", 2, Money::from_cents(1000)),
                OrderLine::new("SKU-B", 1, Money::from_cents(2500)),
            ],
            "USD",
            Money::from_cents(4500),
        );
        let OrderEvent::OrderPlaced(data) = event else {
            panic!("expected OrderPlaced");
        };
        assert_eq!(data.total.cents(), 4500);
    }

    #[test]
    fn events_are_tagged_by_type() {
        let event = OrderEvent::item_reserved(ProductId::new("SKU-A"), 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ItemReserved");
        assert_eq!(json["data"]["product_id"], "SKU-A");
        assert_eq!(json["data"]["quantity"], 3);
        assert_eq!(event.event_type(), "ItemReserved");
    }
}
