//! Startup errors and HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use messaging::MessagingError;
use saga::SagaError;
use saga::product::ProductServiceError;
use saga::webhook::WebhookError;
use thiserror::Error;

/// Errors that stop the node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("broker setup failed: {0}")]
    Messaging(#[from] MessagingError),

    #[error("product service client: {0}")]
    ProductService(#[from] ProductServiceError),

    #[error("metrics recorder: {0}")]
    Metrics(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Error returned by an HTTP handler.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
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
        match &err {
            SagaError::Webhook(WebhookError::InvalidSecret) => ApiError::Internal(err.to_string()),
            SagaError::Webhook(_) | SagaError::Validation(_) | SagaError::Domain(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SagaError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            SagaError::Concurrency { .. } => ApiError::Conflict(err.to_string()),
            _ if err.is_transient() => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::AggregateId;

    use super::*;

    #[test]
    fn webhook_failures_are_client_errors() {
        let err: ApiError = SagaError::Webhook(WebhookError::SignatureMismatch).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_payment_is_not_found() {
        let err: ApiError = SagaError::NotFound {
            aggregate_type: "Payment",
            id: AggregateId::new(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
