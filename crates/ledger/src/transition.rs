use chrono::{DateTime, Utc};
use domain::TransactionStatus;
use serde::{Deserialize, Serialize};

use crate::TransactionId;

/// One entry in a transaction's audit trail.
///
/// Written by the store itself whenever a record is created or its status
/// changes, so the trail cannot drift from the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub transaction_id: TransactionId,
    /// `None` for the creation entry.
    pub from: Option<TransactionStatus>,
    pub to: TransactionStatus,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    pub fn created(transaction_id: TransactionId, at: DateTime<Utc>) -> Self {
        Self {
            transaction_id,
            from: None,
            to: TransactionStatus::Pending,
            note: None,
            at,
        }
    }

    pub fn changed(
        transaction_id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id,
            from: Some(from),
            to,
            note,
            at,
        }
    }
}
