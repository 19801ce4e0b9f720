use async_trait::async_trait;
use domain::{NewTransaction, Transaction, TransactionPatch, TransactionStatus};

use crate::{LedgerError, Result, StatusTransition, TransactionId, UserId};

/// Options for updating a transaction record.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Status the record must currently be in for the update to apply.
    /// If None, the update applies to whatever status is stored.
    pub expected_status: Option<TransactionStatus>,
}

impl UpdateOptions {
    /// Creates options with no status precondition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options that only apply the update if the record is in `status`.
    pub fn expect_status(status: TransactionStatus) -> Self {
        Self {
            expected_status: Some(status),
        }
    }
}

/// Durable ledger of recharge transactions.
///
/// The saga orchestrator is the only writer of `status`. Implementations
/// enforce the lifecycle themselves: an update that would move a record
/// backwards, or modify a `success`/`refunded` record, is rejected.
/// Every status change is recorded in the record's history.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Creates a record in `pending` and assigns its id.
    async fn create(&self, new: NewTransaction) -> Result<Transaction>;

    /// Applies a partial update and returns the updated record.
    ///
    /// If `options.expected_status` is set, the update is conditional and
    /// fails with `StatusConflict` when the stored status differs.
    async fn update(
        &self,
        id: TransactionId,
        patch: TransactionPatch,
        options: UpdateOptions,
    ) -> Result<Transaction>;

    /// Retrieves a record, or None if it doesn't exist.
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Lists a user's records, newest first.
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Transaction>>;

    /// Finds the record holding a gateway charge id.
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>>;

    /// Lists all records currently in `status`, oldest first.
    async fn list_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>>;

    /// Returns the audit trail of a record, oldest first.
    async fn history(&self, id: TransactionId) -> Result<Vec<StatusTransition>>;
}

/// Extension trait providing convenience methods for transaction stores.
#[async_trait]
pub trait TransactionStoreExt: TransactionStore {
    /// Retrieves a record, failing with `NotFound` if it doesn't exist.
    async fn get_required(&self, id: TransactionId) -> Result<Transaction> {
        self.get(id).await?.ok_or(LedgerError::NotFound(id))
    }

    /// Moves a record from `from` to the status carried by `patch`.
    async fn transition(
        &self,
        id: TransactionId,
        from: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<Transaction> {
        self.update(id, patch, UpdateOptions::expect_status(from))
            .await
    }
}

// Blanket implementation for all TransactionStore implementations
impl<T: TransactionStore + ?Sized> TransactionStoreExt for T {}

/// Checks an update against the stored record.
///
/// Shared by every implementation so that they reject the same writes.
pub fn validate_update(
    current: &Transaction,
    patch: &TransactionPatch,
    options: &UpdateOptions,
) -> Result<()> {
    if let Some(expected) = options.expected_status
        && current.status != expected
    {
        metrics::counter!("ledger_status_conflicts_total").increment(1);
        return Err(LedgerError::StatusConflict {
            id: current.id,
            expected,
            actual: current.status,
        });
    }

    current
        .check_patch(patch)
        .map_err(|source| LedgerError::Transition {
            id: current.id,
            source,
        })
}

/// Builds the audit entry for an update, if it changes the status.
pub(crate) fn transition_for(
    current: &Transaction,
    patch: &TransactionPatch,
    at: chrono::DateTime<chrono::Utc>,
) -> Option<StatusTransition> {
    let to = patch.status?;
    if to == current.status {
        return None;
    }
    let note = patch.error_message.clone().flatten();
    Some(StatusTransition::changed(current.id, current.status, to, note, at))
}
