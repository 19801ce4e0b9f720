//! External collaborators of the saga: payment gateways and the top-up provider.
//!
//! Each collaborator is a trait with an in-memory implementation for tests
//! and sandbox runs, plus an HTTP adapter for the real service.

pub mod dingconnect;
pub mod mercadopago;
pub mod payment;
pub mod stripe;
pub mod topup;

pub use dingconnect::DingConnectProvider;
pub use mercadopago::MercadoPagoGateway;
pub use payment::{
    ApprovalState, ChargeRequest, ChargeResult, InMemoryPaymentGateway, PaymentGateway,
    PaymentGateways, PaymentStatus, PresentationData, RefundResult,
};
pub use stripe::StripeGateway;
pub use topup::{
    InMemoryTopUpProvider, SubmittedTopUp, TopUpOutcome, TopUpProvider, TopUpResult,
    TransferState,
};
