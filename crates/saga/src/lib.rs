//! Recharge transaction saga.
//!
//! Moves a customer's money through three independently failing systems
//! (payment gateway, top-up provider, ledger) so that a customer is never
//! charged without receiving either the top-up or a refund:
//! 1. `process_recharge`: validate, record, create the charge
//! 2. `confirm_and_recharge`: re-verify the charge with the gateway, top up
//! 3. `process_refund`: compensate a failed top-up
//!
//! Deferred top-ups and late payment notifications are settled through the
//! reconciliation operations.

pub mod compensation;
pub mod config;
pub mod dedup;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod reconciliation;
pub mod services;

pub use compensation::MANUAL_INTERVENTION;
pub use config::SagaConfig;
pub use dedup::{DeduplicationCache, TopUpKey};
pub use error::{Result, SagaError};
pub use guard::{GuardTicket, IdempotencyGuard};
pub use orchestrator::{RechargeInitiated, SagaOrchestrator, SharedTopUp};
pub use reconciliation::{PaymentNotification, ReconciliationReport};
pub use services::{
    ApprovalState, ChargeRequest, ChargeResult, DingConnectProvider, InMemoryPaymentGateway,
    InMemoryTopUpProvider, MercadoPagoGateway, PaymentGateway, PaymentGateways, PaymentStatus,
    PresentationData, RefundResult, StripeGateway, SubmittedTopUp, TopUpOutcome, TopUpProvider,
    TopUpResult, TransferState,
};
