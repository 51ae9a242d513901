//! Checkout submission.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use common::UserId;
use messaging::CheckoutItem;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,

    /// Lines to check out. Required: the HTTP surface has no cart-editing
    /// routes, so there is no stored cart to fall back on.
    pub items: Vec<CheckoutItem>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutAccepted {
    pub order_id: String,
}

/// POST /checkout: hands the cart to the saga and returns the order ID to poll.
#[tracing::instrument(skip(state, payload))]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CheckoutAccepted>), ApiError> {
    let Json(request) = payload?;

    let order_id = state
        .producer
        .checkout(request.user_id, request.items)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CheckoutAccepted {
            order_id: order_id.to_string(),
        }),
    ))
}
