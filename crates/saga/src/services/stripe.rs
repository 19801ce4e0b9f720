//! Card gateway over the Stripe PaymentIntents API.

use std::time::Duration;

use async_trait::async_trait;
use domain::{Currency, Money};
use reqwest::{Client, Response};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

use super::payment::{
    ApprovalState, ChargeRequest, ChargeResult, PaymentGateway, PaymentStatus, PresentationData,
    RefundResult,
};
use crate::error::SagaError;

pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

/// Currencies Stripe takes in whole units rather than cents.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    currency: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    code: Option<String>,
    message: Option<String>,
}

/// Converts an amount into the integer Stripe expects for `currency`.
pub fn wire_amount(amount: Money, currency: &Currency) -> Result<i64, SagaError> {
    if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        amount
            .to_decimal()
            .round()
            .to_i64()
            .ok_or_else(|| SagaError::Gateway(format!("amount {amount} out of range")))
    } else {
        Ok(amount.minor())
    }
}

/// Maps a PaymentIntent status onto the saga's approval states.
pub fn approval_state(status: &str) -> ApprovalState {
    match status {
        "succeeded" => ApprovalState::Approved,
        "processing" | "requires_payment_method" | "requires_confirmation" | "requires_action"
        | "requires_capture" => ApprovalState::Pending,
        _ => ApprovalState::Declined,
    }
}

/// Card charges through Stripe. The customer confirms client-side.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SagaError> {
        let secret_key = secret_key.into();
        if !(secret_key.starts_with("sk_live_") || secret_key.starts_with("sk_test_")) {
            return Err(SagaError::Configuration(
                "Stripe secret key must start with sk_live_ or sk_test_".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch_intent(&self, charge_id: &str) -> Result<PaymentIntent, SagaError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payment_intents/{charge_id}")))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport)?;
        parse(response).await
    }
}

fn transport(err: reqwest::Error) -> SagaError {
    SagaError::Gateway(format!("Stripe request failed: {err}"))
}

async fn read_error(response: Response) -> (u16, Option<StripeError>) {
    let status = response.status().as_u16();
    let body = response.json::<ErrorEnvelope>().await.ok().map(|e| e.error);
    (status, body)
}

fn describe(status: u16, error: Option<StripeError>) -> SagaError {
    let detail = error
        .and_then(|e| e.message)
        .unwrap_or_else(|| "no error body".to_string());
    SagaError::Gateway(format!("Stripe returned {status}: {detail}"))
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SagaError> {
    if !response.status().is_success() {
        let (status, error) = read_error(response).await;
        return Err(describe(status, error));
    }
    response
        .json()
        .await
        .map_err(|e| SagaError::Gateway(format!("Stripe response: {e}")))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[tracing::instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, SagaError> {
        let amount = wire_amount(request.amount, &request.currency)?;
        let currency = request.currency.as_str().to_ascii_lowercase();
        let transaction_id = request.transaction_id.to_string();
        let mut form = vec![
            ("amount", amount.to_string()),
            ("currency", currency),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("description", request.description.clone()),
            ("metadata[transaction_id]", transaction_id),
            ("metadata[user_id]", request.payer.user_id.to_string()),
        ];
        if let Some(email) = &request.payer.email {
            form.push(("receipt_email", email.clone()));
        }

        let response = self
            .client
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", request.idempotency_key())
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let intent: PaymentIntent = parse(response).await?;

        let secret = intent
            .client_secret
            .ok_or_else(|| SagaError::Gateway("Stripe returned no client secret".to_string()))?;

        Ok(ChargeResult {
            charge_id: intent.id,
            status: intent.status,
            presentation: PresentationData::ClientSecret { secret },
        })
    }

    #[tracing::instrument(skip(self))]
    async fn poll_status(&self, charge_id: &str) -> Result<PaymentStatus, SagaError> {
        let intent = self.fetch_intent(charge_id).await?;
        Ok(PaymentStatus {
            state: approval_state(&intent.status),
            raw_status: intent.status,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn refund(
        &self,
        charge_id: &str,
        amount: Option<Money>,
    ) -> Result<RefundResult, SagaError> {
        let mut form = vec![("payment_intent", charge_id.to_string())];
        if let Some(amount) = amount {
            // the wire unit depends on the currency the intent was charged in
            let intent = self.fetch_intent(charge_id).await?;
            let currency = intent
                .currency
                .as_deref()
                .map(|c| Currency::new(c).map_err(|e| SagaError::Gateway(e.to_string())))
                .transpose()?
                .unwrap_or_else(Currency::brl);
            form.push(("amount", wire_amount(amount, &currency)?.to_string()));
        }

        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("refund-{charge_id}"))
            .form(&form)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            let (status, error) = read_error(response).await;
            if error
                .as_ref()
                .and_then(|e| e.code.as_deref())
                .is_some_and(|code| code == "charge_already_refunded")
            {
                tracing::info!(charge_id, "payment intent already refunded");
                return Ok(RefundResult {
                    refund_id: format!("refund-{charge_id}"),
                    status: "succeeded".to_string(),
                });
            }
            return Err(describe(status, error));
        }

        let refund: Refund = response
            .json()
            .await
            .map_err(|e| SagaError::Gateway(format!("Stripe response: {e}")))?;
        Ok(RefundResult {
            refund_id: refund.id,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}
