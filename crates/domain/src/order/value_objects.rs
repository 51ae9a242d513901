//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use super::OrderState;

/// A line as priced at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// `None` when the amount does not fit in `Money`.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_times(self.quantity)
    }
}

/// Where a line item's stock hold stands.
///
/// This is the durable per-item bookkeeping that lets a redelivered message
/// resume a saga without re-issuing ledger calls that already succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    #[default]
    Unreserved,
    Reserved,
    Confirmed,
    Released,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Unreserved => "unreserved",
            AllocationStatus::Reserved => "reserved",
            AllocationStatus::Confirmed => "confirmed",
            AllocationStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line item inside an order, with its allocation marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub allocation: AllocationStatus,
}

impl From<OrderLine> for LineItem {
    fn from(line: OrderLine) -> Self {
        Self {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            allocation: AllocationStatus::Unreserved,
        }
    }
}

/// One entry of the order's status history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: OrderState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtotal_multiplies_quantity() {
        let line = OrderLine::new("SKU-1", 3, Money::from_cents(250));
        assert_eq!(line.subtotal(), Some(Money::from_cents(750)));

        let huge = OrderLine::new("SKU-1", u32::MAX, Money::from_cents(i64::MAX / 2));
        assert_eq!(huge.subtotal(), None);
    }

    #[test]
    fn new_line_items_start_unreserved() {
        let item = LineItem::from(OrderLine::new("SKU-1", 1, Money::from_cents(100)));
        assert_eq!(item.allocation, AllocationStatus::Unreserved);
    }
}
