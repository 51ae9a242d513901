//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use inventory::LedgerError;
use messaging::ChannelError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// A backend is down; the client may retry.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "backend unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::InvalidCheckout(_) => ApiError::BadRequest(err.to_string()),
            SagaError::UnknownOrder(_) => ApiError::NotFound(err.to_string()),
            SagaError::Channel(ChannelError::Unavailable(_)) => {
                ApiError::Unavailable(err.to_string())
            }
            SagaError::Domain(err) => err.into(),
            SagaError::Ledger(err) => err.into(),
            _ if err.is_transient() => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        if err.is_transient() {
            ApiError::Unavailable(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownProduct { .. } => ApiError::NotFound(err.to_string()),
            LedgerError::InvalidQuantity { .. } => ApiError::BadRequest(err.to_string()),
            _ if err.is_transient() => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId};
    use messaging::MessageError;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status(SagaError::InvalidCheckout(MessageError::Invalid(
                "items is empty".to_string()
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(SagaError::Channel(ChannelError::Unavailable("down".to_string()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(SagaError::UnknownOrder(OrderId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(LedgerError::UnknownProduct {
                product_id: ProductId::new("SKU-404"),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(LedgerError::Storage(sqlx::Error::PoolTimedOut)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(LedgerError::Storage(sqlx::Error::RowNotFound)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
