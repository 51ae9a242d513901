//! Saga error types.

use common::{OrderId, UserId};
use domain::{DomainError, OrderError, OrderState};
use inventory::LedgerError;
use messaging::{ChannelError, HandlerError, MessageError};
use thiserror::Error;

use crate::payment::GatewayError;

/// Errors that can occur while driving the checkout saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A message references an order that was never placed.
    #[error("Order not found: {0}")]
    UnknownOrder(OrderId),

    /// The order ID is already taken by another user.
    #[error("Order {order_id} belongs to {owner}, not {claimed_by}")]
    UserMismatch {
        order_id: OrderId,
        owner: UserId,
        claimed_by: UserId,
    },

    /// A payment outcome arrived before the order asked for payment.
    #[error("Payment outcome for order {order_id} arrived early (state {state})")]
    OutOfOrder { order_id: OrderId, state: OrderState },

    /// The cart failed validation at checkout.
    #[error("Invalid checkout: {0}")]
    InvalidCheckout(#[from] MessageError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl SagaError {
    /// Returns true when redelivering the same message may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::OutOfOrder { .. } => true,
            SagaError::Domain(DomainError::Order(OrderError::AlreadyPlaced)) => true,
            SagaError::Domain(err) => err.is_transient(),
            SagaError::Ledger(err) => err.is_transient(),
            SagaError::Channel(err) => err.is_transient(),
            SagaError::Gateway(GatewayError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        if err.is_transient() {
            return HandlerError::Transient(err.to_string());
        }

        match &err {
            SagaError::UnknownOrder(_)
            | SagaError::UserMismatch { .. }
            | SagaError::InvalidCheckout(_) => HandlerError::Discard(err.to_string()),
            SagaError::Domain(DomainError::Order(order_err)) if order_err.is_invalid_request() => {
                HandlerError::Discard(err.to_string())
            }
            _ => HandlerError::DeadLetter(err.to_string()),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use event_store::EventStoreError;
    use inventory::{HoldKey, HoldStatus};

    #[test]
    fn unknown_order_and_user_mismatch_are_discarded() {
        let unknown: HandlerError = SagaError::UnknownOrder(OrderId::new()).into();
        assert!(matches!(unknown, HandlerError::Discard(_)));

        let mismatch: HandlerError = SagaError::UserMismatch {
            order_id: OrderId::new(),
            owner: UserId::new("alice"),
            claimed_by: UserId::new("mallory"),
        }
        .into();
        assert!(matches!(mismatch, HandlerError::Discard(_)));
    }

    #[test]
    fn ledger_invariant_violation_is_dead_lettered() {
        let err: HandlerError = SagaError::Ledger(LedgerError::InvariantViolation {
            product_id: ProductId::new("SKU-1"),
            operation: "release",
            requested: 3,
            reserved: 1,
        })
        .into();
        assert!(matches!(err, HandlerError::DeadLetter(_)));
    }

    #[test]
    fn hold_conflict_is_dead_lettered() {
        let err: HandlerError = SagaError::Ledger(LedgerError::HoldConflict {
            key: HoldKey::new(OrderId::new(), "SKU-1"),
            operation: "confirm",
            status: HoldStatus::Released,
        })
        .into();
        assert!(matches!(err, HandlerError::DeadLetter(_)));
    }

    #[test]
    fn unplaceable_order_request_is_discarded() {
        let err: HandlerError = SagaError::Domain(DomainError::Order(
            OrderError::QuantityOverflow {
                product_id: ProductId::new("SKU-1"),
            },
        ))
        .into();
        assert!(matches!(err, HandlerError::Discard(_)));
    }

    #[test]
    fn order_invariant_breach_is_dead_lettered() {
        let err: HandlerError =
            SagaError::Domain(DomainError::Order(OrderError::OutstandingAllocations {
                count: 1,
            }))
            .into();
        assert!(matches!(err, HandlerError::DeadLetter(_)));
    }

    #[test]
    fn conflicts_outages_and_early_outcomes_are_transient() {
        let conflict = SagaError::Domain(DomainError::EventStore(EventStoreError::Unavailable(
            "down".to_string(),
        )));
        assert!(matches!(
            HandlerError::from(conflict),
            HandlerError::Transient(_)
        ));

        let channel = SagaError::Channel(ChannelError::Unavailable("down".to_string()));
        assert!(matches!(HandlerError::from(channel), HandlerError::Transient(_)));

        let early = SagaError::OutOfOrder {
            order_id: OrderId::new(),
            state: OrderState::Reserved,
        };
        assert!(matches!(HandlerError::from(early), HandlerError::Transient(_)));

        let gateway = SagaError::Gateway(GatewayError::Unavailable("timeout".to_string()));
        assert!(matches!(HandlerError::from(gateway), HandlerError::Transient(_)));
    }
}
