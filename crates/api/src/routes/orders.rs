//! Order status polling.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::Order;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub user_id: Option<String>,
    pub state: String,
    pub currency: String,
    pub total_cents: i64,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub items: Vec<LineItemResponse>,
    pub history: Vec<TransitionResponse>,
}

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub allocation: String,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub state: String,
    pub at: DateTime<Utc>,
}

impl OrderResponse {
    fn new(order_id: OrderId, order: &Order) -> Self {
        Self {
            order_id: order_id.to_string(),
            user_id: order.user_id().map(ToString::to_string),
            state: order.state().to_string(),
            currency: order.currency().to_string(),
            total_cents: order.total().cents(),
            payment_id: order.payment_id().map(str::to_string),
            failure_reason: order.failure_reason().map(str::to_string),
            items: order
                .items()
                .iter()
                .map(|item| LineItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                    allocation: item.allocation.to_string(),
                })
                .collect(),
            history: order
                .history()
                .iter()
                .map(|transition| TransitionResponse {
                    state: transition.state.to_string(),
                    at: transition.at,
                })
                .collect(),
        }
    }
}

/// GET /orders/{id}: current state, allocation markers and transition times.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid order id: {id}")))?;

    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::new(order_id, &order)))
}
