//! Top-up provider trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{Currency, Money, OperatorRegistry};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// Result of a top-up submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpResult {
    pub success: bool,
    pub provider_transaction_id: Option<String>,
    /// Accepted but not final; settlement arrives later under `correlation_id`.
    pub is_deferred: bool,
    pub correlation_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl TopUpResult {
    pub fn completed(provider_transaction_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_transaction_id: Some(provider_transaction_id.into()),
            is_deferred: false,
            correlation_id: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn deferred(provider_transaction_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_transaction_id: Some(provider_transaction_id.into()),
            is_deferred: true,
            correlation_id: Some(correlation_id.into()),
            error_code: None,
            error_message: None,
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_transaction_id: None,
            is_deferred: false,
            correlation_id: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    /// Human-readable reason for an unsuccessful result.
    pub fn failure_reason(&self) -> String {
        match (&self.error_code, &self.error_message) {
            (Some(code), Some(message)) => format!("{message} ({code})"),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => format!("provider error {code}"),
            (None, None) => "provider rejected the transfer".to_string(),
        }
    }
}

/// Settlement state of a deferred transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Completed {
        provider_transaction_id: Option<String>,
    },
    Pending,
    Failed {
        message: String,
    },
}

/// Trait for the prepaid top-up provider.
///
/// Implementations resolve the operator and check the phone digits against
/// the registry before any network call; a bad destination is a
/// `SagaError::Validation`, and no provider balance is spent on it.
#[async_trait]
pub trait TopUpProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submits a top-up. `amount` is in the settlement currency.
    ///
    /// `reference` is echoed back by the provider for traceability.
    async fn perform_top_up(
        &self,
        phone: &str,
        operator_id: &str,
        amount: Money,
        currency: &Currency,
        reference: &str,
    ) -> Result<TopUpResult, SagaError>;

    /// Looks up the settlement state of a deferred transfer.
    async fn transfer_status(&self, correlation_id: &str) -> Result<TransferState, SagaError>;
}

/// Behavior of the in-memory provider on the next submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopUpOutcome {
    Succeed,
    Defer,
    Reject { code: String, message: String },
    Error(String),
    /// Panics inside the provider call.
    Panic,
}

/// A submission recorded by the in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTopUp {
    pub phone_digits: String,
    pub operator_id: String,
    pub provider_code: u32,
    pub amount: Money,
    pub currency: Currency,
    pub reference: String,
}

#[derive(Debug)]
struct InMemoryTopUpState {
    outcome: TopUpOutcome,
    delay: Option<Duration>,
    submitted: Vec<SubmittedTopUp>,
    transfers: HashMap<String, TransferState>,
    next_id: u32,
}

/// In-memory top-up provider for testing and sandbox runs.
#[derive(Debug, Clone)]
pub struct InMemoryTopUpProvider {
    registry: Arc<OperatorRegistry>,
    state: Arc<RwLock<InMemoryTopUpState>>,
}

impl InMemoryTopUpProvider {
    /// Creates a provider that completes every transfer synchronously.
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self {
            registry,
            state: Arc::new(RwLock::new(InMemoryTopUpState {
                outcome: TopUpOutcome::Succeed,
                delay: None,
                submitted: Vec::new(),
                transfers: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    pub fn set_outcome(&self, outcome: TopUpOutcome) {
        self.state.write().unwrap().outcome = outcome;
    }

    /// Delays every submission, to simulate a slow provider.
    pub fn set_delay(&self, delay: Duration) {
        self.state.write().unwrap().delay = Some(delay);
    }

    /// Returns the number of submissions that reached the provider.
    pub fn call_count(&self) -> usize {
        self.state.read().unwrap().submitted.len()
    }

    pub fn submitted(&self) -> Vec<SubmittedTopUp> {
        self.state.read().unwrap().submitted.clone()
    }

    /// Settles a deferred transfer.
    pub fn complete_transfer(&self, correlation_id: &str, state: TransferState) {
        self.state
            .write()
            .unwrap()
            .transfers
            .insert(correlation_id.to_string(), state);
    }
}

#[async_trait]
impl TopUpProvider for InMemoryTopUpProvider {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn perform_top_up(
        &self,
        phone: &str,
        operator_id: &str,
        amount: Money,
        currency: &Currency,
        reference: &str,
    ) -> Result<TopUpResult, SagaError> {
        let destination = self.registry.validate_destination(phone, operator_id)?;

        let (outcome, delay, n) = {
            let mut state = self.state.write().unwrap();
            state.submitted.push(SubmittedTopUp {
                phone_digits: destination.phone_digits.clone(),
                operator_id: operator_id.to_string(),
                provider_code: destination.operator.provider_code,
                amount,
                currency: currency.clone(),
                reference: reference.to_string(),
            });
            state.next_id += 1;
            (state.outcome.clone(), state.delay, state.next_id)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            TopUpOutcome::Succeed => Ok(TopUpResult::completed(format!("TU-{n:04}"))),
            TopUpOutcome::Defer => {
                let correlation_id = format!("CORR-{n:04}");
                self.state
                    .write()
                    .unwrap()
                    .transfers
                    .insert(correlation_id.clone(), TransferState::Pending);
                Ok(TopUpResult::deferred(format!("TU-{n:04}"), correlation_id))
            }
            TopUpOutcome::Reject { code, message } => Ok(TopUpResult::rejected(code, message)),
            TopUpOutcome::Error(message) => Err(SagaError::Provider(message)),
            TopUpOutcome::Panic => panic!("top-up provider crashed"),
        }
    }

    async fn transfer_status(&self, correlation_id: &str) -> Result<TransferState, SagaError> {
        self.state
            .read()
            .unwrap()
            .transfers
            .get(correlation_id)
            .cloned()
            .ok_or_else(|| SagaError::Provider(format!("Unknown transfer {correlation_id}")))
    }
}
