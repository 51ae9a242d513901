//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    ItemAllocationData, OrderCancelledData, OrderEvent, OrderPlacedData, PaymentFailedData,
    PaymentRequestedData, PaymentSucceededData, ReservationFailedData, TransitionData,
};
pub use service::OrderService;
pub use state::OrderState;
pub use value_objects::{AllocationStatus, LineItem, OrderLine, StateTransition};

use common::ProductId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order with this ID has already been placed.
    #[error("Order already placed")]
    AlreadyPlaced,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    #[error("User ID is required")]
    UserIdRequired,

    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: i64 },

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderState,
        action: &'static str,
    },

    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: ProductId },

    /// A line item's marker does not allow the requested ledger step.
    #[error("Item {product_id} is {actual}, expected {expected}")]
    AllocationMismatch {
        product_id: ProductId,
        expected: AllocationStatus,
        actual: AllocationStatus,
    },

    /// Items still carry a marker that blocks the transition.
    #[error("{count} item(s) still outstanding")]
    OutstandingAllocations { count: usize },

    /// Merged lines for one product exceed the quantity range.
    #[error("Quantity for {product_id} overflows")]
    QuantityOverflow { product_id: ProductId },

    #[error("Order total overflows")]
    TotalOverflow,
}

impl OrderError {
    /// True when the order request itself can never be placed, as opposed
    /// to a command that does not fit the order's current state.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            OrderError::NoItems
                | OrderError::UserIdRequired
                | OrderError::InvalidQuantity { .. }
                | OrderError::InvalidPrice { .. }
                | OrderError::QuantityOverflow { .. }
                | OrderError::TotalOverflow
        )
    }
}
