//! Stock display.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use common::ProductId;
use inventory::StockCheck;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

/// GET /inventory/{product_id}?quantity=n: advisory stock check, never a hold.
#[tracing::instrument(skip(state, query))]
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    query: Result<Query<StockQuery>, QueryRejection>,
) -> Result<Json<StockCheck>, ApiError> {
    let Query(query) = query?;
    let product_id = ProductId::new(product_id);

    let check = state.ledger.check_stock(&product_id, query.quantity).await?;
    Ok(Json(check))
}
