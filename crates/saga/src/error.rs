//! Saga error types.

use std::time::Duration;

use common::TransactionId;
use domain::ValidationError;
use ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Missing or invalid credentials or settings. Raised before any external call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input rejected before any money moves.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Charge creation, status poll or refund failed at the payment gateway.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// The top-up provider reported a failure.
    #[error("Top-up provider error: {0}")]
    Provider(String),

    /// A bounded call exceeded its deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Another execution already holds this transaction.
    #[error("Transaction {0} is already being processed, retry later")]
    Duplicate(TransactionId),

    /// The top-up matched one already submitted for a different transaction.
    #[error("Top-up collapsed onto transaction {0}")]
    Collapsed(TransactionId),

    /// Unanticipated failure inside the confirmed-payment window.
    #[error("Critical error: {0}")]
    Critical(String),

    /// The transaction is not in a state this operation can act on.
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl SagaError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::Configuration(_) => "configuration",
            SagaError::Validation(_) => "validation",
            SagaError::Gateway(_) => "gateway",
            SagaError::Provider(_) => "provider",
            SagaError::Timeout { .. } => "timeout",
            SagaError::Duplicate(_) => "duplicate",
            SagaError::Collapsed(_) => "collapsed",
            SagaError::Critical(_) => "critical",
            SagaError::InvalidState(_) => "invalid_state",
            SagaError::TransactionNotFound(_) => "not_found",
            SagaError::Ledger(_) => "ledger",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
