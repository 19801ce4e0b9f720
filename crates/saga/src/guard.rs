//! Per-process single-writer guard for `confirm_and_recharge`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::TransactionId;

/// Set of transaction ids with an execution in flight.
///
/// Acquisition is an atomic test-and-set: a second caller for the same id is
/// rejected, never queued. The slot is released when the returned ticket is
/// dropped, so every exit path (return, `?`, panic unwinding) frees it.
///
/// This only serializes callers inside one process. Across nodes the ledger's
/// conditional updates are what keep two writers apart.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyGuard {
    active: Arc<Mutex<HashSet<TransactionId>>>,
}

/// Proof of exclusive access to one transaction id.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the ticket is dropped"]
pub struct GuardTicket {
    id: TransactionId,
    active: Arc<Mutex<HashSet<TransactionId>>>,
}

fn lock(set: &Mutex<HashSet<TransactionId>>) -> MutexGuard<'_, HashSet<TransactionId>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`, or returns None if it is already registered.
    pub fn try_acquire(&self, id: TransactionId) -> Option<GuardTicket> {
        if lock(&self.active).insert(id) {
            Some(GuardTicket {
                id,
                active: Arc::clone(&self.active),
            })
        } else {
            None
        }
    }

    pub fn is_active(&self, id: TransactionId) -> bool {
        lock(&self.active).contains(&id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }
}

impl GuardTicket {
    pub fn id(&self) -> TransactionId {
        self.id
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected() {
        let guard = IdempotencyGuard::new();
        let id = TransactionId::new();

        let ticket = guard.try_acquire(id).unwrap();
        assert!(guard.try_acquire(id).is_none());
        assert!(guard.is_active(id));

        // other ids are independent
        assert!(guard.try_acquire(TransactionId::new()).is_some());

        drop(ticket);
        assert!(!guard.is_active(id));
        assert!(guard.try_acquire(id).is_some());
    }

    #[test]
    fn ticket_is_released_on_panic() {
        let guard = IdempotencyGuard::new();
        let id = TransactionId::new();

        let cloned = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _ticket = cloned.try_acquire(id).unwrap();
            panic!("boom");
        });

        assert!(result.is_err());
        assert_eq!(guard.active_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_acquire_admits_exactly_one() {
        let guard = IdempotencyGuard::new();
        let id = TransactionId::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move {
                    let ticket = guard.try_acquire(id);
                    tokio::task::yield_now().await;
                    let won = ticket.is_some();
                    // hold until every task has tried
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    drop(ticket);
                    won
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
