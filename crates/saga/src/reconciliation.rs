//! Payment notifications, deferred top-up settlement and recovery of
//! confirmations abandoned mid-run.
//!
//! Notifications are only triggers: they tell the saga which record to look
//! at, and the saga then asks the gateway or provider for the actual state.

use chrono::Utc;
use common::TransactionId;
use domain::{Transaction, TransactionPatch, TransactionStatus};
use ledger::{TransactionStore, TransactionStoreExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::orchestrator::{SagaOrchestrator, bounded};
use crate::services::TransferState;

/// A payment event as delivered by a gateway webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub event_type: String,
    pub charge_id: String,
    /// Status claimed by the sender. Logged, never acted on.
    #[serde(default)]
    pub status: Option<String>,
}

/// Summary of a reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub settled: usize,
    pub compensated: usize,
    pub pending: usize,
    /// Confirmed payments picked up after their run stopped.
    pub resumed: usize,
    /// Records skipped because a run in this process holds them.
    pub in_flight: usize,
    pub errors: usize,
}

impl<S: TransactionStore> SagaOrchestrator<S> {
    /// Re-verifies the record a payment notification points at.
    ///
    /// Returns None if no record holds `charge_id`.
    #[tracing::instrument(skip(self, notification), fields(charge_id = %notification.charge_id, event = %notification.event_type))]
    pub async fn handle_payment_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<Option<Transaction>> {
        metrics::counter!("payment_notifications_total").increment(1);
        let Some(tx) = self.store.find_by_payment_id(&notification.charge_id).await? else {
            tracing::debug!("no transaction for charge");
            return Ok(None);
        };
        tracing::info!(
            transaction_id = %tx.id,
            status = %tx.status,
            claimed = ?notification.status,
            "payment notification received"
        );

        let result = match tx.status {
            TransactionStatus::PaymentPending | TransactionStatus::PaymentConfirmed => {
                self.confirm_and_recharge(tx.id, &notification.charge_id, &tx.request())
                    .await
            }
            TransactionStatus::Failed if tx.refund_id.is_none() => {
                let Some(_ticket) = self.guard.try_acquire(tx.id) else {
                    return Ok(Some(tx));
                };
                let tx = self.load(tx.id).await?;
                if tx.status != TransactionStatus::Failed {
                    return Ok(Some(tx));
                }
                let context = tx
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "payment approved after the transaction failed".to_string());
                self.refund_if_captured(tx, &context).await
            }
            TransactionStatus::Processing => self.reconcile_deferred(tx.id).await,
            _ => return Ok(Some(tx)),
        };

        match result {
            Ok(tx) => Ok(Some(tx)),
            // someone else is already working on it
            Err(SagaError::Duplicate(id)) => Ok(Some(self.load(id).await?)),
            Err(e) => Err(e),
        }
    }

    /// Settles a `processing` record from the provider's view of the transfer.
    ///
    /// Completed transfers become `success`, failed ones are compensated and
    /// pending ones are left alone. Records in any other status are returned
    /// unchanged.
    #[tracing::instrument(skip(self), fields(transaction_id = %id))]
    pub async fn reconcile_deferred(&self, id: TransactionId) -> Result<Transaction> {
        let Some(_ticket) = self.guard.try_acquire(id) else {
            return Err(SagaError::Duplicate(id));
        };

        let tx = self.load(id).await?;
        if tx.status != TransactionStatus::Processing {
            return Ok(tx);
        }

        let Some(lookup) = tx
            .correlation_id
            .clone()
            .or_else(|| tx.provider_transaction_id.clone())
        else {
            return Err(SagaError::InvalidState(format!(
                "deferred transaction {id} has no provider reference"
            )));
        };

        let state = bounded(
            "transfer_status",
            self.config.gateway_timeout,
            self.provider.transfer_status(&lookup),
        )
        .await?;

        match state {
            TransferState::Completed {
                provider_transaction_id,
            } => {
                let tx = self
                    .store
                    .transition(
                        id,
                        TransactionStatus::Processing,
                        TransactionPatch::status(TransactionStatus::Success)
                            .with_provider_transaction_id(provider_transaction_id)
                            .clear_error(),
                    )
                    .await?;
                metrics::counter!("recharge_succeeded_total").increment(1);
                tracing::info!("deferred top-up settled");
                Ok(tx)
            }
            TransferState::Pending => {
                tracing::debug!("deferred top-up still pending");
                Ok(tx)
            }
            TransferState::Failed { message } => {
                tracing::warn!(%message, "deferred top-up failed, compensating");
                self.refund_record(tx, &format!("Deferred top-up failed: {message}"))
                    .await
            }
        }
    }

    /// Resumes a `payment_confirmed` record whose run stopped before the
    /// top-up outcome was recorded.
    ///
    /// The record must be older than `abandoned_after` and not held by a run
    /// in this process; otherwise it is returned unchanged. The top-up is
    /// resubmitted under the same transaction reference, and a failure is
    /// compensated as in `confirm_and_recharge`.
    #[tracing::instrument(skip(self), fields(transaction_id = %id))]
    pub async fn recover_abandoned(&self, id: TransactionId) -> Result<Transaction> {
        let Some(_ticket) = self.guard.try_acquire(id) else {
            return Err(SagaError::Duplicate(id));
        };

        let tx = self.load(id).await?;
        if tx.status != TransactionStatus::PaymentConfirmed || !self.is_abandoned(&tx) {
            return Ok(tx);
        }
        let Some(payment_id) = tx.payment_id.clone() else {
            return Err(SagaError::InvalidState(format!(
                "transaction {id} is {} without a payment id",
                tx.status
            )));
        };

        metrics::counter!("saga_abandoned_resumed_total").increment(1);
        tracing::warn!(updated_at = %tx.updated_at, "resuming abandoned confirmation");
        self.confirm_locked(id, &payment_id, &tx.request()).await
    }

    fn is_abandoned(&self, tx: &Transaction) -> bool {
        let idle = (Utc::now() - tx.updated_at).to_std().unwrap_or_default();
        idle >= self.config.abandoned_after
    }

    /// Sweeps every record that holds captured funds without an outcome.
    ///
    /// `processing` records are settled against the provider and abandoned
    /// `payment_confirmed` records are resumed. Errors on individual records
    /// are counted and logged; the sweep carries on with the rest.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_all_deferred(&self) -> Result<ReconciliationReport> {
        let mut records = Vec::new();
        for status in TransactionStatus::ALL {
            if status.holds_captured_funds() {
                records.extend(self.store.list_by_status(status).await?);
            }
        }
        let mut report = ReconciliationReport::default();

        for record in records {
            report.checked += 1;
            if self.guard.is_active(record.id) {
                report.in_flight += 1;
                continue;
            }

            let result = match record.status {
                TransactionStatus::PaymentConfirmed => {
                    let result = self.recover_abandoned(record.id).await;
                    if matches!(&result, Ok(tx) if tx.status != TransactionStatus::PaymentConfirmed) {
                        report.resumed += 1;
                    }
                    result
                }
                _ => self.reconcile_deferred(record.id).await,
            };

            match result {
                Ok(tx) => match tx.status {
                    TransactionStatus::Success => report.settled += 1,
                    TransactionStatus::Refunded | TransactionStatus::Failed => {
                        report.compensated += 1
                    }
                    _ => report.pending += 1,
                },
                // picked up by a run between the check and the acquire
                Err(SagaError::Duplicate(_)) => report.in_flight += 1,
                Err(e) => {
                    tracing::warn!(transaction_id = %record.id, error = %e, "reconciliation failed");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            settled = report.settled,
            compensated = report.compensated,
            pending = report.pending,
            resumed = report.resumed,
            in_flight = report.in_flight,
            errors = report.errors,
            "reconciliation sweep finished"
        );
        Ok(report)
    }
}
