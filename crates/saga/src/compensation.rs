//! Compensating refunds.

use std::panic::AssertUnwindSafe;

use common::TransactionId;
use domain::{RechargeRequest, Transaction, TransactionPatch, TransactionStatus, quote};
use futures_util::FutureExt;
use ledger::{TransactionStore, TransactionStoreExt};

use crate::error::{Result, SagaError};
use crate::orchestrator::{SagaOrchestrator, bounded, panic_message};
use crate::services::ApprovalState;

/// Prefix of the diagnostic left on a record whose refund could not be made.
pub const MANUAL_INTERVENTION: &str = "MANUAL INTERVENTION REQUIRED";

impl<S: TransactionStore> SagaOrchestrator<S> {
    /// Refunds the captured total of a transaction whose top-up failed.
    ///
    /// Applies to records in `payment_confirmed` or `processing`, and to
    /// `failed` records whose charge the gateway still reports as captured.
    /// A `refunded` record is returned unchanged. `payment_id` and `request`
    /// are advisory, as in `confirm_and_recharge`.
    #[tracing::instrument(skip(self, request), fields(transaction_id = %id))]
    pub async fn process_refund(
        &self,
        id: TransactionId,
        payment_id: &str,
        request: &RechargeRequest,
        failure_context: &str,
    ) -> Result<Transaction> {
        let Some(_ticket) = self.guard.try_acquire(id) else {
            return Err(SagaError::Duplicate(id));
        };

        let tx = self.load(id).await?;
        if tx.payment_id.as_deref() != Some(payment_id) {
            tracing::warn!(supplied = payment_id, recorded = ?tx.payment_id, "payment id differs from ledger, using ledger");
        }
        if *request != tx.request() {
            tracing::warn!("request differs from ledger, using ledger");
        }

        match tx.status {
            TransactionStatus::Refunded => Ok(tx),
            TransactionStatus::PaymentConfirmed | TransactionStatus::Processing => {
                self.refund_record(tx, failure_context).await
            }
            TransactionStatus::Failed => self.refund_if_captured(tx, failure_context).await,
            other => Err(SagaError::InvalidState(format!(
                "transaction {id} is {other}, nothing to refund"
            ))),
        }
    }

    /// Refunds a `failed` record only if the gateway reports its charge as captured.
    pub(crate) async fn refund_if_captured(
        &self,
        tx: Transaction,
        failure_context: &str,
    ) -> Result<Transaction> {
        let Some(charge_id) = tx.payment_id.as_deref() else {
            return Ok(tx);
        };

        let gateway = self.gateways.for_method(tx.payment_method);
        let status = bounded(
            "poll_status",
            self.config.gateway_timeout,
            gateway.poll_status(charge_id),
        )
        .await?;

        if status.state != ApprovalState::Approved {
            tracing::info!(gateway_status = %status.raw_status, "charge not captured, nothing to refund");
            return Ok(tx);
        }
        self.refund_record(tx, failure_context).await
    }

    /// Refunds the amount recorded on `tx` and records the outcome.
    ///
    /// Never leaves the record where it was: it ends `refunded`, or `failed`
    /// with a manual-intervention diagnostic naming both failures.
    pub(crate) async fn refund_record(
        &self,
        tx: Transaction,
        failure_context: &str,
    ) -> Result<Transaction> {
        let Some(charge_id) = tx.payment_id.clone() else {
            return Err(SagaError::InvalidState(format!(
                "transaction {} has no payment to refund",
                tx.id
            )));
        };

        // amount is fixed at creation; a different quote now means the
        // registry changed, not that the customer paid something else
        match quote(&self.registry, &tx.request()) {
            Ok(q) if q.total != tx.amount => {
                tracing::warn!(recorded = %tx.amount, requoted = %q.total, "pricing changed since charge, refunding recorded amount");
            }
            Err(e) => tracing::warn!(error = %e, "could not re-quote transaction"),
            _ => {}
        }

        let gateway = self.gateways.for_method(tx.payment_method);
        let refund = AssertUnwindSafe(bounded(
            "refund",
            self.config.refund_timeout,
            gateway.refund(&charge_id, Some(tx.amount)),
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(SagaError::Critical(panic_message(panic.as_ref()))));

        match refund {
            Ok(refund) => {
                let updated = self
                    .store
                    .transition(
                        tx.id,
                        tx.status,
                        TransactionPatch::status(TransactionStatus::Refunded)
                            .with_refund_id(refund.refund_id)
                            .with_error(format!(
                                "Recharge failed: {failure_context}. Refund processed automatically"
                            )),
                    )
                    .await?;
                metrics::counter!("recharge_refunded_total").increment(1);
                tracing::info!(
                    transaction_id = %updated.id,
                    refund_id = ?updated.refund_id,
                    amount = %tx.amount,
                    "refund processed"
                );
                Ok(updated)
            }
            Err(refund_err) => {
                let message = format!(
                    "{MANUAL_INTERVENTION}: recharge failed ({failure_context}) and the refund of \
                     {} {} for payment {charge_id} also failed ({refund_err})",
                    tx.amount, tx.currency
                );
                metrics::counter!("recharge_manual_intervention_total").increment(1);
                tracing::error!(
                    transaction_id = %tx.id,
                    payment_id = %charge_id,
                    amount = %tx.amount,
                    currency = %tx.currency,
                    error = %refund_err,
                    "refund failed, money may be stranded"
                );
                Ok(self
                    .store
                    .transition(
                        tx.id,
                        tx.status,
                        TransactionPatch::status(TransactionStatus::Failed).with_error(message),
                    )
                    .await?)
            }
        }
    }
}
