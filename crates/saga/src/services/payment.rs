//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;
use domain::{Currency, Money, PayerInfo, PaymentMethod};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// What the client needs to let the customer pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresentationData {
    /// Payload to render as a scannable code (instant transfer).
    ScanCode {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_base64: Option<String>,
    },
    /// Secret the client uses to confirm a card payment.
    ClientSecret { secret: String },
}

/// Live approval state of a charge, as observed at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Approved,
    Pending,
    Declined,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Approved => "approved",
            ApprovalState::Pending => "pending",
            ApprovalState::Declined => "declined",
        }
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a charge.
///
/// The transaction id doubles as the gateway idempotency key, so a retried
/// request can never create a second charge for the same record.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub currency: Currency,
    pub payer: PayerInfo,
    pub description: String,
}

impl ChargeRequest {
    pub fn idempotency_key(&self) -> String {
        format!("recharge-{}", self.transaction_id)
    }
}

/// Result of a successful charge creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeResult {
    pub charge_id: String,
    pub status: String,
    pub presentation: PresentationData,
}

/// Result of a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatus {
    pub state: ApprovalState,
    /// Gateway-specific status string, kept for diagnostics.
    pub raw_status: String,
}

/// Result of a successful refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundResult {
    pub refund_id: String,
    pub status: String,
}

/// Trait for payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Returns true if charges can be created in `currency`.
    fn supports_currency(&self, _currency: &Currency) -> bool {
        true
    }

    /// Creates a charge for the customer.
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, SagaError>;

    /// Queries the live status of a charge.
    async fn poll_status(&self, charge_id: &str) -> Result<PaymentStatus, SagaError>;

    /// Refunds a charge. `None` refunds the full captured amount.
    ///
    /// Refunding an already-refunded charge succeeds without side effects.
    async fn refund(&self, charge_id: &str, amount: Option<Money>)
    -> Result<RefundResult, SagaError>;
}

/// The two gateway variants, selected by payment method.
#[derive(Clone)]
pub struct PaymentGateways {
    pub instant_transfer: Arc<dyn PaymentGateway>,
    pub card: Arc<dyn PaymentGateway>,
}

impl PaymentGateways {
    pub fn new(instant_transfer: Arc<dyn PaymentGateway>, card: Arc<dyn PaymentGateway>) -> Self {
        Self {
            instant_transfer,
            card,
        }
    }

    pub fn for_method(&self, method: PaymentMethod) -> &Arc<dyn PaymentGateway> {
        match method {
            PaymentMethod::InstantTransfer => &self.instant_transfer,
            PaymentMethod::Card => &self.card,
        }
    }
}

#[derive(Debug, Clone)]
struct FakeCharge {
    amount: Money,
    currency: Currency,
    approval: ApprovalState,
    refunded: Option<Money>,
}

#[derive(Debug)]
struct InMemoryPaymentState {
    charges: HashMap<String, FakeCharge>,
    by_idempotency_key: HashMap<String, String>,
    next_id: u32,
    default_approval: ApprovalState,
    supported_currencies: Option<Vec<Currency>>,
    fail_on_charge: bool,
    fail_on_poll: bool,
    fail_on_refund: bool,
    refund_delay: Option<Duration>,
    charge_calls: usize,
    poll_calls: usize,
    refund_calls: usize,
}

impl Default for InMemoryPaymentState {
    fn default() -> Self {
        Self {
            charges: HashMap::new(),
            by_idempotency_key: HashMap::new(),
            next_id: 0,
            default_approval: ApprovalState::Approved,
            supported_currencies: None,
            fail_on_charge: false,
            fail_on_poll: false,
            fail_on_refund: false,
            refund_delay: None,
            charge_calls: 0,
            poll_calls: 0,
            refund_calls: 0,
        }
    }
}

/// In-memory payment gateway for testing and sandbox runs.
///
/// New charges are approved by default; use `set_default_approval` or
/// `set_approval` to simulate a customer who has not paid yet.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
    method: Option<PaymentMethod>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway presenting card-style client secrets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway that presents scan codes like an instant-transfer provider.
    pub fn instant_transfer() -> Self {
        Self {
            method: Some(PaymentMethod::InstantTransfer),
            ..Self::default()
        }
    }

    /// Configures the gateway to fail charge creation.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Configures the gateway to fail status polls.
    pub fn set_fail_on_poll(&self, fail: bool) {
        self.state.write().unwrap().fail_on_poll = fail;
    }

    /// Configures the gateway to fail refunds.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Delays every refund call, to simulate a slow gateway.
    pub fn set_refund_delay(&self, delay: Duration) {
        self.state.write().unwrap().refund_delay = Some(delay);
    }

    /// Approval state given to charges created from now on.
    pub fn set_default_approval(&self, approval: ApprovalState) {
        self.state.write().unwrap().default_approval = approval;
    }

    /// Overrides the approval state of an existing charge.
    pub fn set_approval(&self, charge_id: &str, approval: ApprovalState) {
        if let Some(charge) = self.state.write().unwrap().charges.get_mut(charge_id) {
            charge.approval = approval;
        }
    }

    /// Restricts the currencies this gateway accepts.
    pub fn set_supported_currencies(&self, currencies: Vec<Currency>) {
        self.state.write().unwrap().supported_currencies = Some(currencies);
    }

    /// Returns the number of distinct charges created.
    pub fn charge_count(&self) -> usize {
        self.state.read().unwrap().charges.len()
    }

    /// Returns the number of `create_charge` calls, including replays.
    pub fn charge_calls(&self) -> usize {
        self.state.read().unwrap().charge_calls
    }

    pub fn poll_calls(&self) -> usize {
        self.state.read().unwrap().poll_calls
    }

    pub fn refund_calls(&self) -> usize {
        self.state.read().unwrap().refund_calls
    }

    /// Returns the amount charged, if the charge exists.
    pub fn charged_amount(&self, charge_id: &str) -> Option<(Money, Currency)> {
        let state = self.state.read().unwrap();
        state
            .charges
            .get(charge_id)
            .map(|c| (c.amount, c.currency.clone()))
    }

    /// Returns the amount refunded, if the charge was refunded.
    pub fn refunded_amount(&self, charge_id: &str) -> Option<Money> {
        self.state
            .read()
            .unwrap()
            .charges
            .get(charge_id)
            .and_then(|c| c.refunded)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    fn name(&self) -> &'static str {
        match self.method {
            Some(PaymentMethod::InstantTransfer) => "in-memory-instant-transfer",
            _ => "in-memory-card",
        }
    }

    fn supports_currency(&self, currency: &Currency) -> bool {
        match &self.state.read().unwrap().supported_currencies {
            Some(list) => list.contains(currency),
            None => true,
        }
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, SagaError> {
        let mut state = self.state.write().unwrap();
        state.charge_calls += 1;

        if state.fail_on_charge {
            return Err(SagaError::Gateway("Charge rejected".to_string()));
        }

        let key = request.idempotency_key();
        let charge_id = match state.by_idempotency_key.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                state.next_id += 1;
                let charge_id = format!("PAY-{:04}", state.next_id);
                let approval = state.default_approval;
                state.charges.insert(
                    charge_id.clone(),
                    FakeCharge {
                        amount: request.amount,
                        currency: request.currency.clone(),
                        approval,
                        refunded: None,
                    },
                );
                state.by_idempotency_key.insert(key, charge_id.clone());
                charge_id
            }
        };

        let presentation = match self.method {
            Some(PaymentMethod::InstantTransfer) => PresentationData::ScanCode {
                payload: format!("00020126-{charge_id}-{}", request.amount),
                image_base64: None,
            },
            _ => PresentationData::ClientSecret {
                secret: format!("{charge_id}_secret"),
            },
        };

        Ok(ChargeResult {
            charge_id,
            status: "pending".to_string(),
            presentation,
        })
    }

    async fn poll_status(&self, charge_id: &str) -> Result<PaymentStatus, SagaError> {
        let mut state = self.state.write().unwrap();
        state.poll_calls += 1;

        if state.fail_on_poll {
            return Err(SagaError::Gateway("Status service unavailable".to_string()));
        }

        let charge = state
            .charges
            .get(charge_id)
            .ok_or_else(|| SagaError::Gateway(format!("Unknown charge {charge_id}")))?;

        let raw_status = if charge.refunded.is_some() {
            "refunded".to_string()
        } else {
            charge.approval.as_str().to_string()
        };
        Ok(PaymentStatus {
            state: charge.approval,
            raw_status,
        })
    }

    async fn refund(
        &self,
        charge_id: &str,
        amount: Option<Money>,
    ) -> Result<RefundResult, SagaError> {
        let delay = {
            let mut state = self.state.write().unwrap();
            state.refund_calls += 1;
            state.refund_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if state.fail_on_refund {
            return Err(SagaError::Gateway("Refund rejected".to_string()));
        }

        let charge = state
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| SagaError::Gateway(format!("Unknown charge {charge_id}")))?;

        if charge.refunded.is_some() {
            return Ok(RefundResult {
                refund_id: format!("RF-{charge_id}"),
                status: "refunded".to_string(),
            });
        }
        if charge.approval == ApprovalState::Declined {
            return Err(SagaError::Gateway(format!(
                "Charge {charge_id} is declined and cannot be refunded"
            )));
        }

        charge.refunded = Some(amount.unwrap_or(charge.amount));
        Ok(RefundResult {
            refund_id: format!("RF-{charge_id}"),
            status: "refunded".to_string(),
        })
    }
}
