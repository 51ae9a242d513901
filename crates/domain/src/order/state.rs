//! Checkout state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in the checkout saga.
///
/// State transitions:
/// ```text
/// Pending ──► Reserving ──► Reserved ──► PaymentRequested ──► Paid ──► Confirmed
///                 │                            │
///                 ▼                            ▼
///         ReservationFailed              PaymentFailed
///                 │                            │
///                 └──────────► Cancelled ◄─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Order recorded, no stock touched yet.
    #[default]
    Pending,

    /// Line items are being reserved one by one.
    Reserving,

    /// Every line item holds a reservation.
    Reserved,

    /// `PaymentRequested` has been published.
    PaymentRequested,

    /// Payment succeeded; reservations are being confirmed.
    Paid,

    /// Stock permanently deducted (terminal).
    Confirmed,

    /// A reservation failed; held items are being released.
    ReservationFailed,

    /// Payment failed; held items are being released.
    PaymentFailed,

    /// All holds released (terminal).
    Cancelled,
}

impl OrderState {
    /// Returns true if line items may be reserved in this state.
    pub fn can_reserve_items(&self) -> bool {
        matches!(self, OrderState::Reserving)
    }

    /// Returns true if the order is unwinding reservations.
    pub fn is_compensating(&self) -> bool {
        matches!(
            self,
            OrderState::ReservationFailed | OrderState::PaymentFailed
        )
    }

    /// Returns true if a payment outcome is meaningful in this state.
    pub fn awaits_payment_outcome(&self) -> bool {
        matches!(
            self,
            OrderState::PaymentRequested | OrderState::Paid | OrderState::PaymentFailed
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Confirmed | OrderState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Reserving => "reserving",
            OrderState::Reserved => "reserved",
            OrderState::PaymentRequested => "payment_requested",
            OrderState::Paid => "paid",
            OrderState::Confirmed => "confirmed",
            OrderState::ReservationFailed => "reservation_failed",
            OrderState::PaymentFailed => "payment_failed",
            OrderState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderState; 9] = [
        OrderState::Pending,
        OrderState::Reserving,
        OrderState::Reserved,
        OrderState::PaymentRequested,
        OrderState::Paid,
        OrderState::Confirmed,
        OrderState::ReservationFailed,
        OrderState::PaymentFailed,
        OrderState::Cancelled,
    ];

    #[test]
    fn default_state_is_pending() {
        assert_eq!(OrderState::default(), OrderState::Pending);
    }

    #[test]
    fn only_confirmed_and_cancelled_are_terminal() {
        let terminal: Vec<_> = ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, [&OrderState::Confirmed, &OrderState::Cancelled]);
    }

    #[test]
    fn compensating_states() {
        assert!(OrderState::ReservationFailed.is_compensating());
        assert!(OrderState::PaymentFailed.is_compensating());
        assert!(!OrderState::Cancelled.is_compensating());
        assert!(!OrderState::Reserving.is_compensating());
    }

    #[test]
    fn reserving_is_the_only_reservation_window() {
        for state in ALL {
            assert_eq!(state.can_reserve_items(), state == OrderState::Reserving);
        }
    }

    #[test]
    fn display_matches_wire_names() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
