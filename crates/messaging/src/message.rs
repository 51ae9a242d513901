//! Checkout message contracts.
//!
//! Every message is a closed type, decoded and validated at the boundary.
//! Unknown extra fields are ignored; anything else that does not fit is a
//! [`MessageError`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a message body was rejected.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// A message that travels on a queue.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Ordering key; messages with the same key are delivered in order.
    fn group_key(&self) -> String;

    /// Checks the invariants serde cannot express.
    fn validate(&self) -> Result<(), MessageError> {
        Ok(())
    }
}

/// Parses and validates a message body.
pub fn decode<M: Message>(body: &str) -> Result<M, MessageError> {
    let message: M = serde_json::from_str(body)?;
    message.validate()?;
    Ok(message)
}

pub fn encode<M: Message>(message: &M) -> Result<String, MessageError> {
    Ok(serde_json::to_string(message)?)
}

/// The literal `event` tag of a checkout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CheckoutEventKind {
    #[default]
    #[serde(rename = "checkout_requested")]
    CheckoutRequested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CheckoutItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A cart turned into an order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequested {
    pub event: CheckoutEventKind,
    pub user_id: UserId,
    pub items: Vec<CheckoutItem>,
    pub timestamp: DateTime<Utc>,
    pub order_id: OrderId,
}

impl CheckoutRequested {
    pub fn new(order_id: OrderId, user_id: impl Into<UserId>, items: Vec<CheckoutItem>) -> Self {
        Self {
            event: CheckoutEventKind::CheckoutRequested,
            user_id: user_id.into(),
            items,
            timestamp: Utc::now(),
            order_id,
        }
    }
}

impl Message for CheckoutRequested {
    fn group_key(&self) -> String {
        self.order_id.to_string()
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.user_id.is_empty() {
            return Err(MessageError::Invalid("user_id is empty".to_string()));
        }
        validate_items(&self.items)
    }
}

/// Checks a list of cart lines: non-empty, named products, positive quantities.
///
/// Lines for the same product are merged downstream, so their sum must fit
/// in a `u32` as well.
pub fn validate_items(items: &[CheckoutItem]) -> Result<(), MessageError> {
    if items.is_empty() {
        return Err(MessageError::Invalid("items is empty".to_string()));
    }
    let mut totals: HashMap<&ProductId, u32> = HashMap::new();
    for item in items {
        if item.product_id.is_empty() {
            return Err(MessageError::Invalid("product_id is empty".to_string()));
        }
        if item.quantity == 0 {
            return Err(MessageError::Invalid(format!(
                "quantity for {} must be greater than 0",
                item.product_id
            )));
        }
        let total = totals.entry(&item.product_id).or_default();
        *total = total.checked_add(item.quantity).ok_or_else(|| {
            MessageError::Invalid(format!("quantity for {} overflows", item.product_id))
        })?;
    }
    Ok(())
}

/// Asks the payment processor to charge an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequested {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl PaymentRequested {
    /// The key charges are deduplicated by; defaults to the order ID.
    pub fn charge_key(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| self.order_id.to_string())
    }
}

impl Message for PaymentRequested {
    fn group_key(&self) -> String {
        self.order_id.to_string()
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.user_id.is_empty() {
            return Err(MessageError::Invalid("user_id is empty".to_string()));
        }
        if self.currency.trim().is_empty() {
            return Err(MessageError::Invalid("currency is empty".to_string()));
        }
        if self.amount.cents() < 0 {
            return Err(MessageError::Invalid("amount is negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    PaymentSucceeded,
    PaymentFailed,
}

/// The outcome of a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub outcome: PaymentOutcome,
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Decline reason; only meaningful for `payment_failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn succeeded(request: &PaymentRequested, payment_id: impl Into<String>) -> Self {
        Self {
            outcome: PaymentOutcome::PaymentSucceeded,
            order_id: request.order_id,
            user_id: request.user_id.clone(),
            payment_id: Some(payment_id.into()),
            amount: Some(request.amount),
            currency: Some(request.currency.clone()),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(request: &PaymentRequested, reason: impl Into<String>) -> Self {
        Self {
            outcome: PaymentOutcome::PaymentFailed,
            order_id: request.order_id,
            user_id: request.user_id.clone(),
            payment_id: None,
            amount: Some(request.amount),
            currency: Some(request.currency.clone()),
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == PaymentOutcome::PaymentSucceeded
    }
}

impl Message for PaymentEvent {
    fn group_key(&self) -> String {
        self.order_id.to_string()
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.user_id.is_empty() {
            return Err(MessageError::Invalid("user_id is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkout_json() -> serde_json::Value {
        json!({
            "event": "checkout_requested",
            "user_id": "user-1",
            "items": [{"product_id": "SKU-A", "quantity": 2}],
            "timestamp": "2024-05-01T12:00:00Z",
            "order_id": "6f1c1f5e-2a43-4f0e-9d7e-2f5c0a1b3c4d",
            "coupon": "ignored"
        })
    }

    #[test]
    fn decodes_checkout_and_ignores_extra_fields() {
        let message: CheckoutRequested = decode(&checkout_json().to_string()).unwrap();
        assert_eq!(message.items, vec![CheckoutItem::new("SKU-A", 2)]);
        assert_eq!(message.group_key(), "6f1c1f5e-2a43-4f0e-9d7e-2f5c0a1b3c4d");
    }

    #[test]
    fn rejects_wrong_event_tag() {
        let mut body = checkout_json();
        body["event"] = json!("checkout_cancelled");
        let result = decode::<CheckoutRequested>(&body.to_string());
        assert!(matches!(result, Err(MessageError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_order_id() {
        let mut body = checkout_json();
        body.as_object_mut().unwrap().remove("order_id");
        assert!(decode::<CheckoutRequested>(&body.to_string()).is_err());
    }

    #[test]
    fn rejects_empty_items_and_zero_quantity() {
        let mut body = checkout_json();
        body["items"] = json!([]);
        assert!(matches!(
            decode::<CheckoutRequested>(&body.to_string()),
            Err(MessageError::Invalid(_))
        ));

        body["items"] = json!([{"product_id": "SKU-A", "quantity": 0}]);
        assert!(matches!(
            decode::<CheckoutRequested>(&body.to_string()),
            Err(MessageError::Invalid(_))
        ));

        body["items"] = json!([{"product_id": "SKU-A", "quantity": -1}]);
        assert!(matches!(
            decode::<CheckoutRequested>(&body.to_string()),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_duplicate_lines_whose_sum_overflows() {
        let mut body = checkout_json();
        body["items"] = json!([
            {"product_id": "SKU-A", "quantity": 3_000_000_000u32},
            {"product_id": "SKU-A", "quantity": 3_000_000_000u32}
        ]);
        assert!(matches!(
            decode::<CheckoutRequested>(&body.to_string()),
            Err(MessageError::Invalid(_))
        ));

        body["items"] = json!([
            {"product_id": "SKU-A", "quantity": 3_000_000_000u32},
            {"product_id": "SKU-B", "quantity": 3_000_000_000u32}
        ]);
        assert!(decode::<CheckoutRequested>(&body.to_string()).is_ok());
    }

    #[test]
    fn rejects_empty_user() {
        let mut body = checkout_json();
        body["user_id"] = json!("");
        assert!(matches!(
            decode::<CheckoutRequested>(&body.to_string()),
            Err(MessageError::Invalid(_))
        ));
    }

    #[test]
    fn payment_event_wire_shape() {
        let request = PaymentRequested {
            order_id: OrderId::new(),
            user_id: UserId::new("user-1"),
            amount: Money::from_cents(1300),
            currency: "USD".to_string(),
            idempotency_key: None,
        };

        let failed = PaymentEvent::failed(&request, "card declined");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["type"], "payment_failed");
        assert_eq!(json["amount"], 1300);
        assert_eq!(json["reason"], "card declined");
        assert!(json.get("payment_id").is_none());

        let decoded: PaymentEvent = decode(&json.to_string()).unwrap();
        assert!(!decoded.is_success());
        assert_eq!(request.charge_key(), request.order_id.to_string());
    }

    #[test]
    fn rejects_unknown_payment_type() {
        let body = json!({
            "type": "payment_refunded",
            "order_id": "6f1c1f5e-2a43-4f0e-9d7e-2f5c0a1b3c4d",
            "user_id": "user-1",
            "timestamp": "2024-05-01T12:00:00Z"
        });
        assert!(decode::<PaymentEvent>(&body.to_string()).is_err());
    }
}
