use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{NewTransaction, Transaction, TransactionPatch, TransactionStatus};
use tokio::sync::RwLock;

use crate::{
    LedgerError, Result, StatusTransition, TransactionId, UserId,
    store::{TransactionStore, UpdateOptions, transition_for, validate_update},
};

#[derive(Default)]
struct Inner {
    records: HashMap<TransactionId, Transaction>,
    history: Vec<StatusTransition>,
}

/// In-memory transaction store for tests and sandbox runs.
///
/// Behaves like the PostgreSQL implementation: conditional updates are
/// checked and applied under one write lock.
#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryTransactionStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Overwrites a record as-is, bypassing lifecycle checks.
    ///
    /// Lets tests stage a record in a state a crashed run could leave behind.
    pub async fn force_put(&self, tx: Transaction) {
        self.inner.write().await.records.insert(tx.id, tx);
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let now = Utc::now();
        let tx = Transaction::from_new(TransactionId::new(), new, now);

        let mut inner = self.inner.write().await;
        inner.history.push(StatusTransition::created(tx.id, now));
        inner.records.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn update(
        &self,
        id: TransactionId,
        patch: TransactionPatch,
        options: UpdateOptions,
    ) -> Result<Transaction> {
        let mut inner = self.inner.write().await;
        let current = inner.records.get(&id).ok_or(LedgerError::NotFound(id))?;
        validate_update(current, &patch, &options)?;

        let now = Utc::now();
        let entry = transition_for(current, &patch, now);

        let mut updated = current.clone();
        updated.apply(patch, now);
        inner.records.insert(id, updated.clone());
        if let Some(entry) = entry {
            inner.history.push(entry);
        }
        Ok(updated)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        let inner = self.inner.read().await;
        let mut records: Vec<Transaction> = inner
            .records
            .values()
            .filter(|tx| &tx.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .find(|tx| tx.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn list_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        let inner = self.inner.read().await;
        let mut records: Vec<Transaction> = inner
            .records
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn history(&self, id: TransactionId) -> Result<Vec<StatusTransition>> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .iter()
            .filter(|t| t.transaction_id == id)
            .cloned()
            .collect())
    }
}
