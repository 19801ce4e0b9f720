//! The recharge saga: charge, confirm, top up, and compensate on failure.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::TransactionId;
use domain::{
    NewTransaction, OperatorRegistry, PayerInfo, RechargeRequest, Transaction, TransactionPatch,
    TransactionStatus, ValidationError, quote, settlement_amount,
};
use futures_util::FutureExt;
use ledger::{TransactionStore, TransactionStoreExt};
use serde::Serialize;

use crate::config::SagaConfig;
use crate::dedup::{DeduplicationCache, TopUpKey};
use crate::error::{Result, SagaError};
use crate::guard::IdempotencyGuard;
use crate::services::{
    ApprovalState, ChargeRequest, PaymentGateways, PresentationData, TopUpProvider, TopUpResult,
};

/// Outcome of a top-up attempt as shared between deduplicated callers.
#[derive(Debug, Clone)]
pub struct SharedTopUp {
    /// Transaction whose confirmation made the provider call.
    pub submitted_by: TransactionId,
    pub outcome: std::result::Result<TopUpResult, Arc<SagaError>>,
}

/// Result of `process_recharge`.
#[derive(Debug, Clone, Serialize)]
pub struct RechargeInitiated {
    pub transaction: Transaction,
    /// What the client shows the payer. None if the charge could not be created.
    pub presentation: Option<PresentationData>,
}

/// Drives recharge transactions through their lifecycle.
///
/// The orchestrator is the only writer of a transaction's status. Every step
/// reads the record back from the ledger and writes with a conditional
/// update on the status it observed.
pub struct SagaOrchestrator<S: TransactionStore> {
    pub(crate) store: S,
    pub(crate) registry: Arc<OperatorRegistry>,
    pub(crate) gateways: PaymentGateways,
    pub(crate) provider: Arc<dyn TopUpProvider>,
    pub(crate) guard: IdempotencyGuard,
    pub(crate) dedup: DeduplicationCache<TopUpKey, SharedTopUp>,
    pub(crate) config: SagaConfig,
}

/// Runs `fut` under a deadline. Dropping the future cancels the call.
pub(crate) async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!("saga_timeouts_total", "operation" => operation).increment(1);
            Err(SagaError::Timeout { operation, after })
        }
    }
}

/// Extracts a readable message from a caught panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}

impl<S: TransactionStore> SagaOrchestrator<S> {
    pub fn new(
        store: S,
        registry: Arc<OperatorRegistry>,
        gateways: PaymentGateways,
        provider: Arc<dyn TopUpProvider>,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            registry,
            gateways,
            provider,
            guard: IdempotencyGuard::new(),
            dedup: DeduplicationCache::new(config.dedup_window),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub(crate) async fn load(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .get(id)
            .await?
            .ok_or(SagaError::TransactionNotFound(id))
    }

    /// Creates the ledger record and the payment charge.
    ///
    /// Validation failures return an error before anything is written or
    /// charged. A charge that cannot be created leaves the record `failed`
    /// with the gateway's error, and is returned without presentation data.
    /// Never calls the top-up provider.
    #[tracing::instrument(
        skip(self, request, payer),
        fields(user_id = %payer.user_id, operator_id = %request.operator_id, method = %request.payment_method)
    )]
    pub async fn process_recharge(
        &self,
        request: RechargeRequest,
        payer: PayerInfo,
    ) -> Result<RechargeInitiated> {
        let quote = quote(&self.registry, &request)?;

        let gateway = self.gateways.for_method(request.payment_method);
        if !gateway.supports_currency(&quote.origin_currency) {
            return Err(ValidationError::UnsupportedCurrency {
                currency: quote.origin_currency,
                method: request.payment_method.to_string(),
            }
            .into());
        }

        let tx = self
            .store
            .create(NewTransaction::from_quote(payer.user_id.clone(), &request, &quote))
            .await?;
        metrics::counter!("recharge_initiated_total").increment(1);
        tracing::info!(
            transaction_id = %tx.id,
            amount = %tx.amount,
            currency = %tx.currency,
            settlement = %quote.settlement.amount,
            "transaction created"
        );

        let charge = ChargeRequest {
            transaction_id: tx.id,
            amount: tx.amount,
            currency: tx.currency.clone(),
            payer,
            description: format!("Mobile recharge {} {}", tx.operator_id, tx.phone_number),
        };

        match bounded(
            "create_charge",
            self.config.gateway_timeout,
            gateway.create_charge(&charge),
        )
        .await
        {
            Ok(result) => {
                let tx = self
                    .store
                    .transition(
                        tx.id,
                        TransactionStatus::Pending,
                        TransactionPatch::status(TransactionStatus::PaymentPending)
                            .with_payment_id(result.charge_id.clone()),
                    )
                    .await?;
                tracing::info!(transaction_id = %tx.id, charge_id = %result.charge_id, "charge created");
                Ok(RechargeInitiated {
                    transaction: tx,
                    presentation: Some(result.presentation),
                })
            }
            Err(e) => {
                metrics::counter!("recharge_failed_total", "stage" => "charge").increment(1);
                tracing::warn!(transaction_id = %tx.id, error = %e, "charge creation failed");
                let tx = self
                    .store
                    .transition(
                        tx.id,
                        TransactionStatus::Pending,
                        TransactionPatch::status(TransactionStatus::Failed)
                            .with_error(format!("Payment creation failed: {e}")),
                    )
                    .await?;
                Ok(RechargeInitiated {
                    transaction: tx,
                    presentation: None,
                })
            }
        }
    }

    /// Verifies the payment and delivers the top-up, refunding on failure.
    ///
    /// Returns `Duplicate` without side effects if another call for `id` is
    /// in flight. `payment_id` and `request` are advisory: the ledger record
    /// is what the saga acts on.
    #[tracing::instrument(skip(self, request), fields(transaction_id = %id))]
    pub async fn confirm_and_recharge(
        &self,
        id: TransactionId,
        payment_id: &str,
        request: &RechargeRequest,
    ) -> Result<Transaction> {
        let Some(_ticket) = self.guard.try_acquire(id) else {
            metrics::counter!("saga_duplicate_rejected_total").increment(1);
            tracing::warn!("confirmation already in flight");
            return Err(SagaError::Duplicate(id));
        };

        self.confirm_locked(id, payment_id, request).await
    }

    /// Body of `confirm_and_recharge`. The caller holds the guard for `id`.
    pub(crate) async fn confirm_locked(
        &self,
        id: TransactionId,
        payment_id: &str,
        request: &RechargeRequest,
    ) -> Result<Transaction> {
        let started = Instant::now();
        let tx = self.load(id).await?;

        match tx.status {
            TransactionStatus::Success
            | TransactionStatus::Refunded
            | TransactionStatus::Processing
            | TransactionStatus::Failed => {
                tracing::debug!(status = %tx.status, "nothing to do");
                return Ok(tx);
            }
            TransactionStatus::Pending => {
                return Err(SagaError::InvalidState(format!(
                    "transaction {id} has no payment yet"
                )));
            }
            TransactionStatus::PaymentPending | TransactionStatus::PaymentConfirmed => {}
        }

        let Some(charge_id) = tx.payment_id.clone() else {
            return Err(SagaError::InvalidState(format!(
                "transaction {id} is {} without a payment id",
                tx.status
            )));
        };
        if charge_id != payment_id {
            tracing::warn!(supplied = payment_id, recorded = %charge_id, "payment id differs from ledger, using ledger");
        }
        if *request != tx.request() {
            tracing::warn!("request differs from ledger, using ledger");
        }

        let tx = if tx.status == TransactionStatus::PaymentPending {
            let gateway = self.gateways.for_method(tx.payment_method);
            let status = bounded(
                "poll_status",
                self.config.gateway_timeout,
                gateway.poll_status(&charge_id),
            )
            .await?;

            if status.state != ApprovalState::Approved {
                metrics::counter!("recharge_failed_total", "stage" => "payment").increment(1);
                tracing::warn!(gateway_status = %status.raw_status, "payment not approved");
                return Ok(self
                    .store
                    .transition(
                        id,
                        TransactionStatus::PaymentPending,
                        TransactionPatch::status(TransactionStatus::Failed).with_error(format!(
                            "Payment not approved: gateway reports {}",
                            status.raw_status
                        )),
                    )
                    .await?);
            }

            self.store
                .transition(
                    id,
                    TransactionStatus::PaymentPending,
                    TransactionPatch::status(TransactionStatus::PaymentConfirmed).clear_error(),
                )
                .await?
        } else {
            tracing::info!("resuming a confirmed payment");
            tx
        };

        let outcome = match AssertUnwindSafe(self.attempt_top_up(&tx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(Arc::new(SagaError::Critical(panic_message(panic.as_ref())))),
        };

        let result = match outcome {
            Ok(top_up) if top_up.success && !top_up.is_deferred => {
                let tx = self
                    .store
                    .transition(
                        id,
                        TransactionStatus::PaymentConfirmed,
                        TransactionPatch::status(TransactionStatus::Success)
                            .with_provider_transaction_id(top_up.provider_transaction_id)
                            .clear_error(),
                    )
                    .await?;
                metrics::counter!("recharge_succeeded_total").increment(1);
                tracing::info!(provider_transaction_id = ?tx.provider_transaction_id, "recharge delivered");
                Ok(tx)
            }
            Ok(top_up) if top_up.success => {
                let tx = self
                    .store
                    .transition(
                        id,
                        TransactionStatus::PaymentConfirmed,
                        TransactionPatch::status(TransactionStatus::Processing)
                            .with_provider_transaction_id(top_up.provider_transaction_id)
                            .with_correlation_id(top_up.correlation_id),
                    )
                    .await?;
                metrics::counter!("recharge_deferred_total").increment(1);
                tracing::info!(correlation_id = ?tx.correlation_id, "top-up deferred by provider");
                Ok(tx)
            }
            Ok(top_up) => {
                let reason = top_up.failure_reason();
                metrics::counter!("recharge_topup_failed_total", "kind" => "provider").increment(1);
                tracing::warn!(%reason, "top-up rejected, compensating");
                self.refund_record(tx, &reason).await
            }
            Err(err) => {
                metrics::counter!("recharge_topup_failed_total", "kind" => err.kind()).increment(1);
                tracing::warn!(error = %err, "top-up failed, compensating");
                self.refund_record(tx, &err.to_string()).await
            }
        };

        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    /// Computes the settlement amount from the ledger record and submits the
    /// top-up through the deduplication cache.
    ///
    /// Only retries of the same transaction may share a provider call. A
    /// result produced for another transaction is an error for this one, so
    /// its capture gets refunded instead of pointing at someone else's top-up.
    async fn attempt_top_up(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<TopUpResult, Arc<SagaError>> {
        let operator = self
            .registry
            .operator(&tx.operator_id)
            .map_err(|e| Arc::new(SagaError::from(e)))?;
        let settlement = settlement_amount(&self.registry, operator, tx.face_amount, &tx.currency)
            .map_err(|e| Arc::new(SagaError::from(e)))?;
        if settlement.clamped {
            tracing::info!(
                face = %tx.face_amount,
                settlement = %settlement.amount,
                "amount raised to operator minimum"
            );
        }

        let key = TopUpKey {
            phone: tx.phone_number.clone(),
            operator_id: tx.operator_id.clone(),
            amount: settlement.amount,
            currency: settlement.currency,
        };
        let provider = Arc::clone(&self.provider);
        let submitted_by = tx.id;
        let reference = tx.id.to_string();
        let deadline = self.config.top_up_timeout;
        let submitted = key.clone();

        let shared = self
            .dedup
            .run(key, move || {
                async move {
                    let call = AssertUnwindSafe(provider.perform_top_up(
                        &submitted.phone,
                        &submitted.operator_id,
                        submitted.amount,
                        &submitted.currency,
                        &reference,
                    ))
                    .catch_unwind();

                    let outcome = match tokio::time::timeout(deadline, call).await {
                        Ok(Ok(Ok(result))) => Ok(result),
                        Ok(Ok(Err(e))) => Err(Arc::new(e)),
                        Ok(Err(panic)) => Err(Arc::new(SagaError::Critical(panic_message(
                            panic.as_ref(),
                        )))),
                        Err(_) => {
                            metrics::counter!("saga_timeouts_total", "operation" => "top_up")
                                .increment(1);
                            Err(Arc::new(SagaError::Timeout {
                                operation: "top_up",
                                after: deadline,
                            }))
                        }
                    };
                    SharedTopUp {
                        submitted_by,
                        outcome,
                    }
                }
                .boxed()
            })
            .await;

        if shared.submitted_by != tx.id {
            metrics::counter!("dedup_foreign_collapse_total").increment(1);
            tracing::warn!(
                transaction_id = %tx.id,
                submitted_by = %shared.submitted_by,
                "identical top-up already submitted for another transaction"
            );
            return Err(Arc::new(SagaError::Collapsed(shared.submitted_by)));
        }
        shared.outcome
    }
}
