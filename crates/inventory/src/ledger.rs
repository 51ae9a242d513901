//! The ledger contract shared by every backend.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Result};

/// Stock counters for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,

    /// Units that can still be reserved.
    pub available: u32,

    /// Units held by open reservations.
    pub reserved: u32,

    /// `available` at or below this is reported as low stock.
    pub threshold: u32,
}

impl InventoryRecord {
    pub fn is_low_stock(&self) -> bool {
        self.available <= self.threshold
    }
}

/// Read-only stock answer for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCheck {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub requested: u32,

    /// Whether `requested` could be reserved right now. Advisory only.
    pub satisfiable: bool,

    pub low_stock: bool,
}

impl StockCheck {
    pub fn from_record(record: &InventoryRecord, requested: u32) -> Self {
        Self {
            product_id: record.product_id.clone(),
            available: record.available,
            reserved: record.reserved,
            requested,
            satisfiable: record.available >= requested,
            low_stock: record.is_low_stock(),
        }
    }
}

/// Names one order's claim on one product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldKey {
    pub order_id: OrderId,
    pub product_id: ProductId,
}

impl HoldKey {
    pub fn new(order_id: OrderId, product_id: impl Into<ProductId>) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
        }
    }
}

impl fmt::Display for HoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.order_id, self.product_id)
    }
}

/// Where a hold stands. A hold only ever moves forward from `Reserved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Reserved,
    Confirmed,
    Released,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Reserved => "reserved",
            HoldStatus::Confirmed => "confirmed",
            HoldStatus::Released => "released",
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HoldStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(HoldStatus::Reserved),
            "confirmed" => Ok(HoldStatus::Confirmed),
            "released" => Ok(HoldStatus::Released),
            other => Err(format!("unknown hold status: {other}")),
        }
    }
}

/// The stock one order line holds, recorded with the counter change that
/// created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub key: HoldKey,
    pub quantity: u32,
    pub status: HoldStatus,
}

/// Per-product stock counters with atomic conditional mutations.
///
/// `reserve`, `release` and `confirm` each apply as a single conditional
/// write; the precondition is checked by the storage layer at apply time,
/// never by a separate read.
///
/// The `*_hold` variants do the same for one order line and record the
/// result in that line's [`Hold`] atomically with the counter change. Each
/// moves a hold at most once, so repeating a call after a lost reply is a
/// no-op instead of a second mutation.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Moves `quantity` from available to reserved.
    ///
    /// Fails with `InsufficientStock` when `available < quantity`.
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord>;

    /// Moves `quantity` from reserved back to available.
    ///
    /// Fails with `InvariantViolation` when `reserved < quantity`.
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord>;

    /// Permanently deducts `quantity` from reserved.
    ///
    /// Fails with `InvariantViolation` when `reserved < quantity`.
    async fn confirm(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord>;

    /// Reserves `quantity` for one order line.
    ///
    /// A repeat for a hold that is still reserved changes nothing and returns
    /// the current counters. Fails with `HoldConflict` once the hold has been
    /// confirmed or released.
    async fn reserve_hold(&self, key: &HoldKey, quantity: u32) -> Result<InventoryRecord>;

    /// Confirms a reserved hold for its recorded quantity.
    ///
    /// A repeat after success is a no-op. Fails with `UnknownHold` when the
    /// order never held the product and `HoldConflict` when it was released.
    async fn confirm_hold(&self, key: &HoldKey) -> Result<InventoryRecord>;

    /// Returns a reserved hold to stock.
    ///
    /// A repeat after success is a no-op. Returns `None` when the order never
    /// held the product; fails with `HoldConflict` when it was confirmed.
    async fn release_hold(&self, key: &HoldKey) -> Result<Option<InventoryRecord>>;

    async fn hold(&self, key: &HoldKey) -> Result<Option<Hold>>;

    /// Reports current counters and whether `quantity` is satisfiable.
    async fn check_stock(&self, product_id: &ProductId, quantity: u32) -> Result<StockCheck>;

    /// Creates a record with initial stock if none exists yet.
    ///
    /// Returns the stored record, which is the existing one when the product
    /// was already registered.
    async fn register_product(
        &self,
        product_id: &ProductId,
        available: u32,
        threshold: u32,
    ) -> Result<InventoryRecord>;

    async fn record(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>>;
}

#[async_trait]
impl<T: InventoryLedger + ?Sized> InventoryLedger for Arc<T> {
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        (**self).reserve(product_id, quantity).await
    }

    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        (**self).release(product_id, quantity).await
    }

    async fn confirm(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        (**self).confirm(product_id, quantity).await
    }

    async fn reserve_hold(&self, key: &HoldKey, quantity: u32) -> Result<InventoryRecord> {
        (**self).reserve_hold(key, quantity).await
    }

    async fn confirm_hold(&self, key: &HoldKey) -> Result<InventoryRecord> {
        (**self).confirm_hold(key).await
    }

    async fn release_hold(&self, key: &HoldKey) -> Result<Option<InventoryRecord>> {
        (**self).release_hold(key).await
    }

    async fn hold(&self, key: &HoldKey) -> Result<Option<Hold>> {
        (**self).hold(key).await
    }

    async fn check_stock(&self, product_id: &ProductId, quantity: u32) -> Result<StockCheck> {
        (**self).check_stock(product_id, quantity).await
    }

    async fn register_product(
        &self,
        product_id: &ProductId,
        available: u32,
        threshold: u32,
    ) -> Result<InventoryRecord> {
        (**self)
            .register_product(product_id, available, threshold)
            .await
    }

    async fn record(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        (**self).record(product_id).await
    }
}

pub(crate) fn hold_conflict(
    key: &HoldKey,
    operation: &'static str,
    status: HoldStatus,
) -> LedgerError {
    LedgerError::HoldConflict {
        key: key.clone(),
        operation,
        status,
    }
}

pub(crate) fn ensure_positive(product_id: &ProductId, quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(LedgerError::InvalidQuantity {
            product_id: product_id.clone(),
        });
    }
    Ok(())
}

// Metrics and logging shared by the backends

pub(crate) fn observe_reserve(product_id: &ProductId, quantity: u32, result: &Result<InventoryRecord>) {
    let outcome = match result {
        Ok(_) => "reserved",
        Err(LedgerError::InsufficientStock { .. }) => "insufficient_stock",
        Err(LedgerError::UnknownProduct { .. }) => "unknown_product",
        Err(_) => "error",
    };
    metrics::counter!("inventory_reservations_total", "outcome" => outcome).increment(1);

    match result {
        Ok(record) => {
            observe_available(record);
            if record.is_low_stock() {
                tracing::warn!(
                    product_id = %product_id,
                    available = record.available,
                    threshold = record.threshold,
                    "Low stock"
                );
            }
        }
        Err(LedgerError::InsufficientStock { available, .. }) => {
            tracing::info!(product_id = %product_id, quantity, available, "Reservation rejected");
        }
        Err(_) => {}
    }
}

pub(crate) fn observe_release(result: &Result<InventoryRecord>) {
    if let Ok(record) = result {
        metrics::counter!("inventory_releases_total").increment(1);
        observe_available(record);
    }
}

pub(crate) fn observe_confirm(result: &Result<InventoryRecord>) {
    if let Ok(record) = result {
        metrics::counter!("inventory_confirmations_total").increment(1);
        observe_available(record);
    }
}

fn observe_available(record: &InventoryRecord) {
    metrics::gauge!("inventory_available", "product_id" => record.product_id.to_string())
        .set(f64::from(record.available));
}
