//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ledger::LedgerError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga execution error.
    Saga(SagaError),
    /// Ledger read error.
    Ledger(LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Ledger(err) => ledger_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::Duplicate(_) | SagaError::Collapsed(_) | SagaError::InvalidState(_) => {
            StatusCode::CONFLICT
        }
        SagaError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::Gateway(_) | SagaError::Provider(_) | SagaError::Timeout { .. } => {
            StatusCode::BAD_GATEWAY
        }
        SagaError::Ledger(ledger) => ledger_status(ledger),
        SagaError::Configuration(_) | SagaError::Critical(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn ledger_error_to_response(err: LedgerError) -> (StatusCode, String) {
    (ledger_status(&err), err.to_string())
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::StatusConflict { .. } | LedgerError::Transition { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::TransactionId;
    use domain::ValidationError;

    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_saga_error_status_codes() {
        let id = TransactionId::new();
        assert_eq!(
            status_of(SagaError::Validation(ValidationError::UnknownOperator(
                "XX".into()
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(SagaError::Duplicate(id)), StatusCode::CONFLICT);
        assert_eq!(status_of(SagaError::Collapsed(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SagaError::TransactionNotFound(id)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SagaError::Configuration("bad key".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(SagaError::Gateway("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SagaError::Timeout {
                operation: "top_up",
                after: Duration::from_secs(60),
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_ledger_error_status_codes() {
        let id = TransactionId::new();
        assert_eq!(status_of(LedgerError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(SagaError::Ledger(LedgerError::NotFound(id))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(LedgerError::Corrupt("bad row".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
