use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::ProductId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::ledger::{self, Hold, HoldKey, HoldStatus, InventoryLedger, InventoryRecord, StockCheck};
use crate::{LedgerError, Result};

/// `(available, reserved)` packed into one word so both move in one CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counters {
    available: u32,
    reserved: u32,
}

impl Counters {
    fn pack(self) -> u64 {
        (u64::from(self.available) << 32) | u64::from(self.reserved)
    }

    fn unpack(word: u64) -> Self {
        Self {
            available: (word >> 32) as u32,
            reserved: word as u32,
        }
    }
}

#[derive(Debug)]
struct Slot {
    counters: AtomicU64,
    threshold: u32,
}

impl Slot {
    fn load(&self) -> Counters {
        Counters::unpack(self.counters.load(Ordering::Acquire))
    }

    /// Applies `step` as one compare-and-swap.
    ///
    /// `step` sees the exact value being replaced; an `Err` from it ends the
    /// call. The loop only repeats when another writer changed the word
    /// between load and swap.
    fn update<F>(&self, mut step: F) -> Result<Counters>
    where
        F: FnMut(Counters) -> Result<Counters>,
    {
        let mut current = self.counters.load(Ordering::Acquire);
        loop {
            let next = step(Counters::unpack(current))?;
            match self.counters.compare_exchange_weak(
                current,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(observed) => current = observed,
            }
        }
    }
}

/// In-memory ledger: an arena of independent atomic counters keyed by product.
///
/// Products never contend with each other; writers on the same product
/// serialize through the CAS on that product's word. A hold-keyed call keeps
/// its hold's map entry locked across the counter CAS, so the hold and the
/// counters change together.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryLedger {
    slots: Arc<DashMap<ProductId, Arc<Slot>>>,
    holds: Arc<DashMap<HoldKey, Hold>>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered products.
    pub fn product_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, product_id: &ProductId) -> Result<Arc<Slot>> {
        self.slots
            .get(product_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| LedgerError::UnknownProduct {
                product_id: product_id.clone(),
            })
    }

    fn current(&self, product_id: &ProductId) -> Result<InventoryRecord> {
        let slot = self.slot(product_id)?;
        Ok(Self::to_record(product_id, &slot, slot.load()))
    }

    fn to_record(product_id: &ProductId, slot: &Slot, counters: Counters) -> InventoryRecord {
        InventoryRecord {
            product_id: product_id.clone(),
            available: counters.available,
            reserved: counters.reserved,
            threshold: slot.threshold,
        }
    }

    fn reserve_now(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        ledger::ensure_positive(product_id, quantity)?;
        let slot = self.slot(product_id)?;

        let counters = slot.update(|c| {
            if c.available < quantity {
                return Err(LedgerError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                    available: c.available,
                });
            }
            let reserved = c
                .reserved
                .checked_add(quantity)
                .ok_or_else(|| violation(product_id, "reserve", quantity, c))?;
            Ok(Counters {
                available: c.available - quantity,
                reserved,
            })
        })?;

        Ok(Self::to_record(product_id, &slot, counters))
    }

    fn release_now(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        ledger::ensure_positive(product_id, quantity)?;
        let slot = self.slot(product_id)?;

        let counters = slot.update(|c| {
            if c.reserved < quantity {
                return Err(violation(product_id, "release", quantity, c));
            }
            let available = c
                .available
                .checked_add(quantity)
                .ok_or_else(|| violation(product_id, "release", quantity, c))?;
            Ok(Counters {
                available,
                reserved: c.reserved - quantity,
            })
        })?;

        Ok(Self::to_record(product_id, &slot, counters))
    }

    fn confirm_now(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        ledger::ensure_positive(product_id, quantity)?;
        let slot = self.slot(product_id)?;

        let counters = slot.update(|c| {
            if c.reserved < quantity {
                return Err(violation(product_id, "confirm", quantity, c));
            }
            Ok(Counters {
                available: c.available,
                reserved: c.reserved - quantity,
            })
        })?;

        Ok(Self::to_record(product_id, &slot, counters))
    }
}

// Hold-keyed operations
impl InMemoryInventoryLedger {
    fn reserve_hold_now(&self, key: &HoldKey, quantity: u32) -> Result<InventoryRecord> {
        match self.holds.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let status = entry.get().status;
                if status != HoldStatus::Reserved {
                    return Err(ledger::hold_conflict(key, "reserve", status));
                }
                tracing::debug!(hold = %key, "Hold already reserved");
                self.current(&key.product_id)
            }
            Entry::Vacant(entry) => {
                let result = self.reserve_now(&key.product_id, quantity);
                ledger::observe_reserve(&key.product_id, quantity, &result);
                let record = result?;
                entry.insert(Hold {
                    key: key.clone(),
                    quantity,
                    status: HoldStatus::Reserved,
                });
                Ok(record)
            }
        }
    }

    fn confirm_hold_now(&self, key: &HoldKey) -> Result<InventoryRecord> {
        let mut hold = self
            .holds
            .get_mut(key)
            .ok_or_else(|| LedgerError::UnknownHold { key: key.clone() })?;

        let status = hold.status;
        match status {
            HoldStatus::Confirmed => self.current(&key.product_id),
            HoldStatus::Released => Err(ledger::hold_conflict(key, "confirm", status)),
            HoldStatus::Reserved => {
                let result = self.confirm_now(&key.product_id, hold.quantity);
                ledger::observe_confirm(&result);
                let record = result?;
                hold.status = HoldStatus::Confirmed;
                Ok(record)
            }
        }
    }

    fn release_hold_now(&self, key: &HoldKey) -> Result<Option<InventoryRecord>> {
        let Some(mut hold) = self.holds.get_mut(key) else {
            return Ok(None);
        };

        let status = hold.status;
        match status {
            HoldStatus::Released => self.current(&key.product_id).map(Some),
            HoldStatus::Confirmed => Err(ledger::hold_conflict(key, "release", status)),
            HoldStatus::Reserved => {
                let result = self.release_now(&key.product_id, hold.quantity);
                ledger::observe_release(&result);
                let record = result?;
                hold.status = HoldStatus::Released;
                Ok(Some(record))
            }
        }
    }
}

fn violation(
    product_id: &ProductId,
    operation: &'static str,
    requested: u32,
    counters: Counters,
) -> LedgerError {
    LedgerError::InvariantViolation {
        product_id: product_id.clone(),
        operation,
        requested,
        reserved: counters.reserved,
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        let result = self.reserve_now(product_id, quantity);
        ledger::observe_reserve(product_id, quantity, &result);
        result
    }

    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        let result = self.release_now(product_id, quantity);
        ledger::observe_release(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn confirm(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        let result = self.confirm_now(product_id, quantity);
        ledger::observe_confirm(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(hold = %key))]
    async fn reserve_hold(&self, key: &HoldKey, quantity: u32) -> Result<InventoryRecord> {
        self.reserve_hold_now(key, quantity)
    }

    #[tracing::instrument(skip(self), fields(hold = %key))]
    async fn confirm_hold(&self, key: &HoldKey) -> Result<InventoryRecord> {
        self.confirm_hold_now(key)
    }

    #[tracing::instrument(skip(self), fields(hold = %key))]
    async fn release_hold(&self, key: &HoldKey) -> Result<Option<InventoryRecord>> {
        self.release_hold_now(key)
    }

    async fn hold(&self, key: &HoldKey) -> Result<Option<Hold>> {
        Ok(self.holds.get(key).map(|hold| hold.value().clone()))
    }

    async fn check_stock(&self, product_id: &ProductId, quantity: u32) -> Result<StockCheck> {
        let record = self.current(product_id)?;
        Ok(StockCheck::from_record(&record, quantity))
    }

    async fn register_product(
        &self,
        product_id: &ProductId,
        available: u32,
        threshold: u32,
    ) -> Result<InventoryRecord> {
        let slot = Arc::clone(
            self.slots
                .entry(product_id.clone())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        counters: AtomicU64::new(
                            Counters {
                                available,
                                reserved: 0,
                            }
                            .pack(),
                        ),
                        threshold,
                    })
                })
                .value(),
        );

        Ok(Self::to_record(product_id, &slot, slot.load()))
    }

    async fn record(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        Ok(self
            .slots
            .get(product_id)
            .map(|slot| Self::to_record(product_id, &slot, slot.load())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(id: &str) -> ProductId {
        ProductId::new(id)
    }

    async fn ledger_with(available: u32) -> InMemoryInventoryLedger {
        let ledger = InMemoryInventoryLedger::new();
        ledger
            .register_product(&sku("SKU-1"), available, 0)
            .await
            .unwrap();
        ledger
    }

    #[test]
    fn counters_pack_round_trip_extremes() {
        let counters = Counters {
            available: u32::MAX,
            reserved: 7,
        };
        assert_eq!(Counters::unpack(counters.pack()), counters);
    }

    #[tokio::test]
    async fn test_reserve_confirm_release_scenario() {
        let ledger = ledger_with(5).await;

        let record = ledger.reserve(&sku("SKU-1"), 3).await.unwrap();
        assert_eq!((record.available, record.reserved), (2, 3));

        let record = ledger.confirm(&sku("SKU-1"), 3).await.unwrap();
        assert_eq!((record.available, record.reserved), (2, 0));

        let err = ledger.release(&sku("SKU-1"), 1).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvariantViolation {
                operation: "release",
                ..
            }
        ));

        let record = ledger.record(&sku("SKU-1")).await.unwrap().unwrap();
        assert_eq!((record.available, record.reserved), (2, 0));
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_counters() {
        let ledger = ledger_with(10).await;

        ledger.reserve(&sku("SKU-1"), 4).await.unwrap();
        let record = ledger.release(&sku("SKU-1"), 4).await.unwrap();

        assert_eq!((record.available, record.reserved), (10, 0));
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_counters_untouched() {
        let ledger = ledger_with(2).await;

        let err = ledger.reserve(&sku("SKU-1"), 3).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));

        let record = ledger.record(&sku("SKU-1")).await.unwrap().unwrap();
        assert_eq!((record.available, record.reserved), (2, 0));
    }

    #[tokio::test]
    async fn test_confirm_more_than_reserved_is_violation() {
        let ledger = ledger_with(5).await;
        ledger.reserve(&sku("SKU-1"), 1).await.unwrap();

        let err = ledger.confirm(&sku("SKU-1"), 2).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_product_and_zero_quantity() {
        let ledger = ledger_with(5).await;

        assert!(matches!(
            ledger.reserve(&sku("SKU-404"), 1).await,
            Err(LedgerError::UnknownProduct { .. })
        ));
        assert!(matches!(
            ledger.reserve(&sku("SKU-1"), 0).await,
            Err(LedgerError::InvalidQuantity { .. })
        ));
        assert!(ledger.record(&sku("SKU-404")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_is_insert_if_absent() {
        let ledger = ledger_with(5).await;
        ledger.reserve(&sku("SKU-1"), 2).await.unwrap();

        let record = ledger.register_product(&sku("SKU-1"), 100, 9).await.unwrap();

        assert_eq!((record.available, record.reserved), (3, 2));
        assert_eq!(record.threshold, 0);
        assert_eq!(ledger.product_count(), 1);
    }

    fn hold_key(product_id: &str) -> HoldKey {
        HoldKey::new(common::OrderId::new(), product_id)
    }

    #[tokio::test]
    async fn test_repeated_hold_reserve_applies_once() {
        let ledger = ledger_with(10).await;
        let key = hold_key("SKU-1");

        ledger.reserve_hold(&key, 3).await.unwrap();
        let record = ledger.reserve_hold(&key, 3).await.unwrap();

        assert_eq!((record.available, record.reserved), (7, 3));
        let hold = ledger.hold(&key).await.unwrap().unwrap();
        assert_eq!((hold.quantity, hold.status), (3, HoldStatus::Reserved));
    }

    #[tokio::test]
    async fn test_repeated_hold_confirm_never_takes_another_orders_stock() {
        let ledger = ledger_with(10).await;
        let mine = hold_key("SKU-1");
        let theirs = hold_key("SKU-1");
        ledger.reserve_hold(&mine, 3).await.unwrap();
        ledger.reserve_hold(&theirs, 3).await.unwrap();

        ledger.confirm_hold(&mine).await.unwrap();
        let record = ledger.confirm_hold(&mine).await.unwrap();
        assert_eq!((record.available, record.reserved), (4, 3));

        let record = ledger.confirm_hold(&theirs).await.unwrap();
        assert_eq!((record.available, record.reserved), (4, 0));
    }

    #[tokio::test]
    async fn test_hold_release_is_idempotent_and_final() {
        let ledger = ledger_with(10).await;
        let key = hold_key("SKU-1");
        ledger.reserve_hold(&key, 4).await.unwrap();

        ledger.release_hold(&key).await.unwrap();
        let record = ledger.release_hold(&key).await.unwrap().unwrap();
        assert_eq!((record.available, record.reserved), (10, 0));

        assert!(matches!(
            ledger.confirm_hold(&key).await,
            Err(LedgerError::HoldConflict {
                operation: "confirm",
                status: HoldStatus::Released,
                ..
            })
        ));
        assert!(matches!(
            ledger.reserve_hold(&key, 4).await,
            Err(LedgerError::HoldConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_holds() {
        let ledger = ledger_with(10).await;
        let key = hold_key("SKU-1");

        assert!(ledger.release_hold(&key).await.unwrap().is_none());
        assert!(matches!(
            ledger.confirm_hold(&key).await,
            Err(LedgerError::UnknownHold { .. })
        ));
        assert!(ledger.hold(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_hold_reserve_records_nothing() {
        let ledger = ledger_with(2).await;
        let key = hold_key("SKU-1");

        assert!(matches!(
            ledger.reserve_hold(&key, 3).await,
            Err(LedgerError::InsufficientStock { .. })
        ));
        assert!(ledger.hold(&key).await.unwrap().is_none());

        ledger.register_product(&sku("SKU-2"), 5, 0).await.unwrap();
        let retry = HoldKey::new(key.order_id, "SKU-2");
        ledger.reserve_hold(&retry, 3).await.unwrap();
        assert!(ledger.hold(&retry).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_check_stock_never_mutates() {
        let ledger = InMemoryInventoryLedger::new();
        ledger.register_product(&sku("SKU-1"), 4, 5).await.unwrap();

        let check = ledger.check_stock(&sku("SKU-1"), 5).await.unwrap();
        assert!(!check.satisfiable);
        assert!(check.low_stock);

        let check = ledger.check_stock(&sku("SKU-1"), 4).await.unwrap();
        assert!(check.satisfiable);
        assert_eq!(check.reserved, 0);
    }
}
