use domain::{TransactionStatus, TransitionError};
use thiserror::Error;

use crate::TransactionId;

/// Errors that can occur when reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No record exists with this id.
    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    /// A conditional update found the record in a different status.
    #[error("Status conflict for transaction {id}: expected {expected}, found {actual}")]
    StatusConflict {
        id: TransactionId,
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    /// The update is not allowed by the transaction lifecycle.
    #[error("Rejected update for transaction {id}: {source}")]
    Transition {
        id: TransactionId,
        #[source]
        source: TransitionError,
    },

    /// A stored row could not be mapped back to a record.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
