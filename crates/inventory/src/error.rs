use common::ProductId;
use thiserror::Error;

use crate::ledger::{HoldKey, HoldStatus};

/// Errors returned by inventory ledger operations.
///
/// Precondition failures are terminal for the call: the ledger never retries
/// them itself.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reserve found fewer units available than requested.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Release or Confirm asked for more than is reserved.
    #[error(
        "Ledger invariant violation on {operation} for {product_id}: requested {requested}, reserved {reserved}"
    )]
    InvariantViolation {
        product_id: ProductId,
        operation: &'static str,
        requested: u32,
        reserved: u32,
    },

    /// A hold-keyed call found the hold past the state it acts on.
    #[error("Hold {key} is {status}, cannot {operation}")]
    HoldConflict {
        key: HoldKey,
        operation: &'static str,
        status: HoldStatus,
    },

    /// Confirm was asked for a hold that was never reserved.
    #[error("No hold for {key}")]
    UnknownHold { key: HoldKey },

    /// A stored hold row could not be read back.
    #[error("Corrupt hold for {key}: {detail}")]
    CorruptHold { key: HoldKey, detail: String },

    #[error("Unknown product: {product_id}")]
    UnknownProduct { product_id: ProductId },

    #[error("Invalid quantity for {product_id}: must be greater than 0")]
    InvalidQuantity { product_id: ProductId },

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl LedgerError {
    /// Returns true when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_outages_are_transient() {
        assert!(LedgerError::Storage(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!LedgerError::Storage(sqlx::Error::RowNotFound).is_transient());
        assert!(
            !LedgerError::InsufficientStock {
                product_id: ProductId::new("SKU-1"),
                requested: 2,
                available: 1,
            }
            .is_transient()
        );
    }
}
