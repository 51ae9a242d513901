//! Order aggregate implementation.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use common::{AggregateId, Money, ProductId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    AllocationStatus, LineItem, OrderError, OrderEvent, OrderLine, OrderState, StateTransition,
    events::{ItemAllocationData, OrderPlacedData},
};

/// Order aggregate root.
///
/// Tracks the checkout saga for one order: its state, a status history and a
/// durable allocation marker per line item. Line items are kept in ascending
/// product-ID order, which is also the order the saga reserves them in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    user_id: Option<UserId>,

    state: OrderState,

    items: Vec<LineItem>,

    currency: String,

    total: Money,

    payment_id: Option<String>,

    /// Reason recorded by the transition that started compensation.
    failure_reason: Option<String>,

    history: Vec<StateTransition>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::ReservationStarted(data) => {
                self.transition(OrderState::Reserving, data.at);
            }
            OrderEvent::ItemReserved(data) => {
                self.mark_item(&data, AllocationStatus::Reserved);
            }
            OrderEvent::InventoryReserved(data) => {
                self.transition(OrderState::Reserved, data.at);
            }
            OrderEvent::ReservationFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.transition(OrderState::ReservationFailed, data.at);
            }
            OrderEvent::ItemReleased(data) => {
                self.mark_item(&data, AllocationStatus::Released);
            }
            OrderEvent::PaymentRequested(data) => {
                self.transition(OrderState::PaymentRequested, data.at);
            }
            OrderEvent::PaymentSucceeded(data) => {
                self.payment_id = data.payment_id;
                self.transition(OrderState::Paid, data.at);
            }
            OrderEvent::PaymentFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.transition(OrderState::PaymentFailed, data.at);
            }
            OrderEvent::ItemConfirmed(data) => {
                self.mark_item(&data, AllocationStatus::Confirmed);
            }
            OrderEvent::OrderConfirmed(data) => {
                self.transition(OrderState::Confirmed, data.at);
            }
            OrderEvent::OrderCancelled(data) => {
                if self.failure_reason.is_none() {
                    self.failure_reason = Some(data.reason);
                }
                self.transition(OrderState::Cancelled, data.at);
            }
        }
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Line items in ascending product-ID order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn item(&self, product_id: &ProductId) -> Option<&LineItem> {
        self.items.iter().find(|item| &item.product_id == product_id)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Every state the order has entered, oldest first.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// When the order entered `state`, if it ever did.
    pub fn transitioned_at(&self, state: OrderState) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .find(|transition| transition.state == state)
            .map(|transition| transition.at)
    }

    /// Items currently holding a reservation, in ascending product-ID order.
    pub fn reserved_items(&self) -> impl DoubleEndedIterator<Item = &LineItem> {
        self.items_with(AllocationStatus::Reserved)
    }

    /// Items not yet reserved, in ascending product-ID order.
    pub fn unreserved_items(&self) -> impl DoubleEndedIterator<Item = &LineItem> {
        self.items_with(AllocationStatus::Unreserved)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn items_with(&self, status: AllocationStatus) -> impl DoubleEndedIterator<Item = &LineItem> {
        self.items
            .iter()
            .filter(move |item| item.allocation == status)
    }

    fn count_with(&self, status: AllocationStatus) -> usize {
        self.items_with(status).count()
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order and opens its reservation phase.
    ///
    /// Duplicate product lines are merged by summing quantities; the first
    /// price seen for a product wins.
    pub fn place(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        currency: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }

        if user_id.is_empty() {
            return Err(OrderError::UserIdRequired);
        }

        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut merged: BTreeMap<ProductId, OrderLine> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                });
            }
            if line.unit_price.cents() < 0 {
                return Err(OrderError::InvalidPrice {
                    product_id: line.product_id,
                    price: line.unit_price.cents(),
                });
            }

            match merged.entry(line.product_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(line);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.quantity = existing
                        .quantity
                        .checked_add(line.quantity)
                        .ok_or(OrderError::QuantityOverflow {
                            product_id: line.product_id,
                        })?;
                }
            }
        }

        let lines: Vec<OrderLine> = merged.into_values().collect();
        let total = lines
            .iter()
            .try_fold(Money::zero(), |total, line| {
                line.subtotal().and_then(|subtotal| total.checked_add(subtotal))
            })
            .ok_or(OrderError::TotalOverflow)?;

        Ok(vec![
            OrderEvent::order_placed(order_id, user_id, lines, currency, total),
            OrderEvent::reservation_started(),
        ])
    }

    /// Records a successful stock hold for one item.
    ///
    /// Returns no events if the item is already reserved.
    pub fn reserve_item(&self, product_id: &ProductId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state.can_reserve_items(), "reserve item")?;

        let item = self.find_item(product_id)?;
        match item.allocation {
            AllocationStatus::Unreserved => Ok(vec![OrderEvent::item_reserved(
                item.product_id.clone(),
                item.quantity,
            )]),
            AllocationStatus::Reserved => Ok(vec![]),
            actual => Err(OrderError::AllocationMismatch {
                product_id: item.product_id.clone(),
                expected: AllocationStatus::Unreserved,
                actual,
            }),
        }
    }

    /// Closes the reservation phase once every item is held.
    pub fn complete_reservation(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state == OrderState::Reserving, "complete reservation")?;

        let outstanding = self.count_with(AllocationStatus::Unreserved);
        if outstanding > 0 {
            return Err(OrderError::OutstandingAllocations { count: outstanding });
        }

        Ok(vec![OrderEvent::inventory_reserved()])
    }

    /// Abandons the reservation phase and starts compensation.
    pub fn fail_reservation(
        &self,
        product_id: Option<ProductId>,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(
            matches!(self.state, OrderState::Pending | OrderState::Reserving),
            "fail reservation",
        )?;

        Ok(vec![OrderEvent::reservation_failed(product_id, reason)])
    }

    /// Records that one item's hold was returned to stock.
    ///
    /// Returns no events if the item is already released.
    pub fn release_item(&self, product_id: &ProductId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state.is_compensating(), "release item")?;

        let item = self.find_item(product_id)?;
        match item.allocation {
            AllocationStatus::Reserved => Ok(vec![OrderEvent::item_released(
                item.product_id.clone(),
                item.quantity,
            )]),
            AllocationStatus::Released => Ok(vec![]),
            actual => Err(OrderError::AllocationMismatch {
                product_id: item.product_id.clone(),
                expected: AllocationStatus::Reserved,
                actual,
            }),
        }
    }

    /// Records that `PaymentRequested` went out for the order total.
    pub fn request_payment(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state == OrderState::Reserved, "request payment")?;

        Ok(vec![OrderEvent::payment_requested(self.total)])
    }

    pub fn record_payment_success(
        &self,
        payment_id: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(
            self.state == OrderState::PaymentRequested,
            "record payment success",
        )?;

        Ok(vec![OrderEvent::payment_succeeded(payment_id)])
    }

    pub fn record_payment_failure(
        &self,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(
            self.state == OrderState::PaymentRequested,
            "record payment failure",
        )?;

        Ok(vec![OrderEvent::payment_failed(reason)])
    }

    /// Records that one item's hold became a permanent deduction.
    ///
    /// Returns no events if the item is already confirmed.
    pub fn confirm_item(&self, product_id: &ProductId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state == OrderState::Paid, "confirm item")?;

        let item = self.find_item(product_id)?;
        match item.allocation {
            AllocationStatus::Reserved => Ok(vec![OrderEvent::item_confirmed(
                item.product_id.clone(),
                item.quantity,
            )]),
            AllocationStatus::Confirmed => Ok(vec![]),
            actual => Err(OrderError::AllocationMismatch {
                product_id: item.product_id.clone(),
                expected: AllocationStatus::Reserved,
                actual,
            }),
        }
    }

    /// Finalizes a paid order once every item is confirmed.
    pub fn confirm(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state == OrderState::Paid, "confirm")?;

        let outstanding = self.items.len() - self.count_with(AllocationStatus::Confirmed);
        if outstanding > 0 {
            return Err(OrderError::OutstandingAllocations { count: outstanding });
        }

        Ok(vec![OrderEvent::order_confirmed()])
    }

    /// Finalizes a compensating order once no item holds stock.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_state(self.state.is_compensating(), "cancel")?;

        let outstanding = self.count_with(AllocationStatus::Reserved);
        if outstanding > 0 {
            return Err(OrderError::OutstandingAllocations { count: outstanding });
        }

        Ok(vec![OrderEvent::order_cancelled(reason)])
    }

    fn ensure_state(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action,
            })
        }
    }

    fn find_item(&self, product_id: &ProductId) -> Result<&LineItem, OrderError> {
        self.item(product_id).ok_or_else(|| OrderError::ItemNotFound {
            product_id: product_id.clone(),
        })
    }
}

// Apply event helpers
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.user_id = Some(data.user_id);
        self.items = data.lines.into_iter().map(LineItem::from).collect();
        self.currency = data.currency;
        self.total = data.total;
        self.transition(OrderState::Pending, data.placed_at);
    }

    fn transition(&mut self, state: OrderState, at: DateTime<Utc>) {
        self.state = state;
        self.history.push(StateTransition { state, at });
    }

    fn mark_item(&mut self, data: &ItemAllocationData, status: AllocationStatus) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.product_id == data.product_id)
        {
            item.allocation = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregate, DomainEvent};

    fn sku(id: &str) -> ProductId {
        ProductId::new(id)
    }

    fn place_order(lines: Vec<OrderLine>) -> (Order, AggregateId) {
        let mut order = Order::default();
        let order_id = AggregateId::new();
        let events = order
            .place(order_id, UserId::new("user-1"), lines, "USD")
            .unwrap();
        order.apply_events(events);
        (order, order_id)
    }

    fn two_item_order() -> Order {
        place_order(vec![
            OrderLine::new("SKU-B", 1, Money::from_cents(500)),
            OrderLine::new("SKU-A", 2, Money::from_cents(1000)),
        ])
        .0
    }

    fn reserve_all(order: &mut Order) {
        let ids: Vec<_> = order
            .unreserved_items()
            .map(|item| item.product_id.clone())
            .collect();
        for id in ids {
            order.apply_events(order.reserve_item(&id).unwrap());
        }
        order.apply_events(order.complete_reservation().unwrap());
    }

    fn awaiting_payment() -> Order {
        let mut order = two_item_order();
        reserve_all(&mut order);
        order.apply_events(order.request_payment().unwrap());
        order
    }

    #[test]
    fn test_place_order_opens_reservation() {
        let (order, order_id) = place_order(vec![OrderLine::new(
            "SKU-A",
            2,
            Money::from_cents(1000),
        )]);

        assert_eq!(order.id(), Some(order_id));
        assert_eq!(order.state(), OrderState::Reserving);
        assert_eq!(order.total().cents(), 2000);
        assert_eq!(order.currency(), "USD");
        assert!(order.transitioned_at(OrderState::Pending).is_some());
        assert!(order.transitioned_at(OrderState::Reserving).is_some());
    }

    #[test]
    fn test_items_sorted_and_merged() {
        let (order, _) = place_order(vec![
            OrderLine::new("SKU-C", 1, Money::from_cents(100)),
            OrderLine::new("SKU-A", 2, Money::from_cents(300)),
            OrderLine::new("SKU-C", 4, Money::from_cents(100)),
        ]);

        let ids: Vec<_> = order.items().iter().map(|i| i.product_id.as_str()).collect();
        assert_eq!(ids, ["SKU-A", "SKU-C"]);
        assert_eq!(order.item(&sku("SKU-C")).unwrap().quantity, 5);
        assert_eq!(order.total().cents(), 1100);
    }

    #[test]
    fn test_merged_quantity_overflow_is_rejected() {
        let order = Order::default();
        let result = order.place(
            AggregateId::new(),
            UserId::new("user-1"),
            vec![
                OrderLine::new("SKU-A", 3_000_000_000, Money::from_cents(1)),
                OrderLine::new("SKU-A", 3_000_000_000, Money::from_cents(1)),
            ],
            "USD",
        );

        let err = result.unwrap_err();
        assert!(matches!(err, OrderError::QuantityOverflow { .. }));
        assert!(err.is_invalid_request());
    }

    #[test]
    fn test_total_overflow_is_rejected() {
        let order = Order::default();
        let result = order.place(
            AggregateId::new(),
            UserId::new("user-1"),
            vec![
                OrderLine::new("SKU-A", 1, Money::from_cents(i64::MAX)),
                OrderLine::new("SKU-B", 1, Money::from_cents(1)),
            ],
            "USD",
        );

        assert!(matches!(result, Err(OrderError::TotalOverflow)));
    }

    #[test]
    fn test_place_twice_fails() {
        let (order, _) = place_order(vec![OrderLine::new("SKU-A", 1, Money::from_cents(1))]);
        let result = order.place(AggregateId::new(), UserId::new("user-1"), vec![], "USD");
        assert!(matches!(result, Err(OrderError::AlreadyPlaced)));
    }

    #[test]
    fn test_place_validation() {
        let order = Order::default();

        let result = order.place(AggregateId::new(), UserId::new("user-1"), vec![], "USD");
        assert!(matches!(result, Err(OrderError::NoItems)));

        let result = order.place(
            AggregateId::new(),
            UserId::new("  "),
            vec![OrderLine::new("SKU-A", 1, Money::from_cents(1))],
            "USD",
        );
        assert!(matches!(result, Err(OrderError::UserIdRequired)));

        let result = order.place(
            AggregateId::new(),
            UserId::new("user-1"),
            vec![OrderLine::new("SKU-A", 0, Money::from_cents(1))],
            "USD",
        );
        assert!(matches!(result, Err(OrderError::InvalidQuantity { .. })));

        let result = order.place(
            AggregateId::new(),
            UserId::new("user-1"),
            vec![OrderLine::new("SKU-A", 1, Money::from_cents(-5))],
            "USD",
        );
        assert!(matches!(result, Err(OrderError::InvalidPrice { .. })));
    }

    #[test]
    fn test_reserve_item_is_idempotent() {
        let mut order = two_item_order();
        order.apply_events(order.reserve_item(&sku("SKU-A")).unwrap());

        assert_eq!(
            order.item(&sku("SKU-A")).unwrap().allocation,
            AllocationStatus::Reserved
        );
        assert!(order.reserve_item(&sku("SKU-A")).unwrap().is_empty());
        assert_eq!(order.unreserved_items().count(), 1);
    }

    #[test]
    fn test_reserve_unknown_item_fails() {
        let order = two_item_order();
        let result = order.reserve_item(&sku("SKU-Z"));
        assert!(matches!(result, Err(OrderError::ItemNotFound { .. })));
    }

    #[test]
    fn test_complete_reservation_requires_all_items() {
        let mut order = two_item_order();
        order.apply_events(order.reserve_item(&sku("SKU-A")).unwrap());

        let result = order.complete_reservation();
        assert!(matches!(
            result,
            Err(OrderError::OutstandingAllocations { count: 1 })
        ));
    }

    #[test]
    fn test_happy_path_to_confirmed() {
        let mut order = awaiting_payment();
        assert_eq!(order.state(), OrderState::PaymentRequested);

        order.apply_events(
            order
                .record_payment_success(Some("PAY-1".to_string()))
                .unwrap(),
        );
        assert_eq!(order.state(), OrderState::Paid);
        assert_eq!(order.payment_id(), Some("PAY-1"));

        for id in [sku("SKU-A"), sku("SKU-B")] {
            order.apply_events(order.confirm_item(&id).unwrap());
        }
        order.apply_events(order.confirm().unwrap());

        assert_eq!(order.state(), OrderState::Confirmed);
        assert!(order.is_terminal());
        assert!(
            order
                .items()
                .iter()
                .all(|item| item.allocation == AllocationStatus::Confirmed)
        );
    }

    #[test]
    fn test_confirm_requires_every_item_confirmed() {
        let mut order = awaiting_payment();
        order.apply_events(order.record_payment_success(None).unwrap());
        order.apply_events(order.confirm_item(&sku("SKU-A")).unwrap());

        assert!(matches!(
            order.confirm(),
            Err(OrderError::OutstandingAllocations { count: 1 })
        ));
    }

    #[test]
    fn test_reservation_failure_compensates_then_cancels() {
        let mut order = two_item_order();
        order.apply_events(order.reserve_item(&sku("SKU-A")).unwrap());
        order.apply_events(
            order
                .fail_reservation(Some(sku("SKU-B")), "insufficient stock")
                .unwrap(),
        );
        assert_eq!(order.state(), OrderState::ReservationFailed);

        // Cannot cancel while SKU-A still holds stock
        assert!(matches!(
            order.cancel("insufficient stock"),
            Err(OrderError::OutstandingAllocations { count: 1 })
        ));

        order.apply_events(order.release_item(&sku("SKU-A")).unwrap());
        order.apply_events(order.cancel("insufficient stock").unwrap());

        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.failure_reason(), Some("insufficient stock"));
        assert_eq!(
            order.item(&sku("SKU-B")).unwrap().allocation,
            AllocationStatus::Unreserved
        );
    }

    #[test]
    fn test_release_unreserved_item_is_mismatch() {
        let mut order = two_item_order();
        order.apply_events(order.fail_reservation(None, "unknown product").unwrap());

        let result = order.release_item(&sku("SKU-A"));
        assert!(matches!(result, Err(OrderError::AllocationMismatch { .. })));
    }

    #[test]
    fn test_payment_failure_path() {
        let mut order = awaiting_payment();
        order.apply_events(order.record_payment_failure("card declined").unwrap());
        assert_eq!(order.state(), OrderState::PaymentFailed);

        let reserved: Vec<_> = order
            .reserved_items()
            .rev()
            .map(|item| item.product_id.clone())
            .collect();
        assert_eq!(reserved, [sku("SKU-B"), sku("SKU-A")]);

        for id in reserved {
            order.apply_events(order.release_item(&id).unwrap());
            assert!(order.release_item(&id).unwrap().is_empty());
        }
        order.apply_events(order.cancel("payment failed").unwrap());

        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.failure_reason(), Some("card declined"));
    }

    #[test]
    fn test_payment_outcome_requires_payment_requested() {
        let mut order = two_item_order();
        reserve_all(&mut order);

        assert!(matches!(
            order.record_payment_success(None),
            Err(OrderError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            order.record_payment_failure("declined"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_request_payment_carries_total() {
        let mut order = two_item_order();
        reserve_all(&mut order);

        let events = order.request_payment().unwrap();
        assert_eq!(events[0].event_type(), "PaymentRequested");
        let OrderEvent::PaymentRequested(data) = &events[0] else {
            panic!("expected PaymentRequested");
        };
        assert_eq!(data.amount.cents(), 2500);
    }

    #[test]
    fn test_cannot_cancel_confirmed_order() {
        let mut order = awaiting_payment();
        order.apply_events(order.record_payment_success(None).unwrap());
        for id in [sku("SKU-A"), sku("SKU-B")] {
            order.apply_events(order.confirm_item(&id).unwrap());
        }
        order.apply_events(order.confirm().unwrap());

        assert!(matches!(
            order.cancel("too late"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_history_records_each_state() {
        let order = awaiting_payment();
        let states: Vec<_> = order.history().iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            [
                OrderState::Pending,
                OrderState::Reserving,
                OrderState::Reserved,
                OrderState::PaymentRequested,
            ]
        );
    }

    #[test]
    fn test_serialization() {
        let mut order = two_item_order();
        order.apply_events(order.reserve_item(&sku("SKU-A")).unwrap());

        let json = serde_json::to_string(&order).unwrap();
        let deserialized: Order = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id(), order.id());
        assert_eq!(deserialized.items(), order.items());
        assert_eq!(deserialized.state(), OrderState::Reserving);
    }
}
