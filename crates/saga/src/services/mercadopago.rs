//! Instant-transfer gateway over the MercadoPago payments API (PIX).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::{Currency, Money};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::payment::{
    ApprovalState, ChargeRequest, ChargeResult, PaymentGateway, PaymentStatus, PresentationData,
    RefundResult,
};
use crate::error::SagaError;

pub const DEFAULT_BASE_URL: &str = "https://api.mercadopago.com";

/// How long a generated PIX code stays payable.
const CHARGE_EXPIRY_MINUTES: i64 = 30;

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    description: &'a str,
    payment_method_id: &'static str,
    payer: Payer<'a>,
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
    date_of_expiration: String,
    metadata: Metadata<'a>,
}

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    transaction_id: String,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct RefundBody {
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: serde_json::Value,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Maps a MercadoPago payment status onto the saga's approval states.
pub fn approval_state(status: &str) -> ApprovalState {
    match status {
        "approved" => ApprovalState::Approved,
        "pending" | "in_process" | "authorized" | "in_mediation" => ApprovalState::Pending,
        _ => ApprovalState::Declined,
    }
}

/// PIX charges through MercadoPago. Amounts travel in major units.
#[derive(Debug, Clone)]
pub struct MercadoPagoGateway {
    client: Client,
    base_url: String,
    access_token: String,
    notification_url: Option<String>,
}

impl MercadoPagoGateway {
    /// Builds the gateway, rejecting tokens that are not sandbox or production tokens.
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SagaError> {
        let access_token = access_token.into();
        if !(access_token.starts_with("TEST-") || access_token.starts_with("APP_USR-")) {
            return Err(SagaError::Configuration(
                "MercadoPago access token must start with TEST- or APP_USR-".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            notification_url: None,
        })
    }

    /// URL MercadoPago should post payment notifications to.
    pub fn with_notification_url(mut self, url: impl Into<String>) -> Self {
        self.notification_url = Some(url.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch_payment(&self, charge_id: &str) -> Result<PaymentResponse, SagaError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{charge_id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;

        parse(check(response).await?).await
    }
}

fn transport(err: reqwest::Error) -> SagaError {
    SagaError::Gateway(format!("MercadoPago request failed: {err}"))
}

async fn check(response: Response) -> Result<Response, SagaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: Option<ErrorBody> = response.json().await.ok();
    let detail = body
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| status.to_string());
    Err(SagaError::Gateway(format!("MercadoPago returned {}: {detail}", status.as_u16())))
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SagaError> {
    response
        .json()
        .await
        .map_err(|e| SagaError::Gateway(format!("MercadoPago response: {e}")))
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    fn supports_currency(&self, currency: &Currency) -> bool {
        *currency == Currency::brl()
    }

    #[tracing::instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, SagaError> {
        let fallback_email = format!("{}@customers.invalid", request.payer.user_id);
        let body = CreatePaymentBody {
            transaction_amount: request.amount.to_decimal(),
            description: &request.description,
            payment_method_id: "pix",
            payer: Payer {
                email: request.payer.email.as_deref().unwrap_or(&fallback_email),
            },
            external_reference: request.transaction_id.to_string(),
            notification_url: self.notification_url.as_deref(),
            date_of_expiration: (Utc::now() + chrono::Duration::minutes(CHARGE_EXPIRY_MINUTES))
                .to_rfc3339(),
            metadata: Metadata {
                transaction_id: request.transaction_id.to_string(),
                user_id: request.payer.user_id.as_str(),
            },
        };

        let response = self
            .client
            .post(self.url("/v1/payments"))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", request.idempotency_key())
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let payment: PaymentResponse = parse(check(response).await?).await?;

        let data = payment
            .point_of_interaction
            .and_then(|p| p.transaction_data)
            .ok_or_else(|| SagaError::Gateway("MercadoPago response has no PIX data".to_string()))?;
        let payload = data
            .qr_code
            .ok_or_else(|| SagaError::Gateway("MercadoPago response has no PIX code".to_string()))?;

        Ok(ChargeResult {
            charge_id: id_string(&payment.id),
            status: payment.status,
            presentation: PresentationData::ScanCode {
                payload,
                image_base64: data.qr_code_base64,
            },
        })
    }

    #[tracing::instrument(skip(self))]
    async fn poll_status(&self, charge_id: &str) -> Result<PaymentStatus, SagaError> {
        let payment = self.fetch_payment(charge_id).await?;
        Ok(PaymentStatus {
            state: approval_state(&payment.status),
            raw_status: payment.status,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn refund(
        &self,
        charge_id: &str,
        amount: Option<Money>,
    ) -> Result<RefundResult, SagaError> {
        let current = self.fetch_payment(charge_id).await?;
        match current.status.as_str() {
            "refunded" => {
                tracing::info!(charge_id, "payment already refunded");
                return Ok(RefundResult {
                    refund_id: format!("refund-{charge_id}"),
                    status: "refunded".to_string(),
                });
            }
            "approved" => {}
            other => {
                return Err(SagaError::Gateway(format!(
                    "Payment {charge_id} cannot be refunded in status {other}"
                )));
            }
        }

        let response = self
            .client
            .post(self.url(&format!("/v1/payments/{charge_id}/refunds")))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", format!("refund-{charge_id}"))
            .json(&RefundBody {
                amount: amount.map(|m| m.to_decimal()),
            })
            .send()
            .await
            .map_err(transport)?;
        let refund: RefundResponse = parse(check(response).await?).await?;

        Ok(RefundResult {
            refund_id: id_string(&refund.id),
            status: refund.status.unwrap_or_else(|| "approved".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TransactionId;
    use domain::PayerInfo;
    use mockito::Matcher;

    fn gateway(url: String) -> MercadoPagoGateway {
        MercadoPagoGateway::new(url, "TEST-1234567890", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_rejects_malformed_token() {
        let result = MercadoPagoGateway::new(DEFAULT_BASE_URL, "secret", Duration::from_secs(5));
        assert!(matches!(result, Err(SagaError::Configuration(_))));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(approval_state("approved"), ApprovalState::Approved);
        assert_eq!(approval_state("in_process"), ApprovalState::Pending);
        assert_eq!(approval_state("rejected"), ApprovalState::Declined);
        assert_eq!(approval_state("charged_back"), ApprovalState::Declined);
    }

    #[tokio::test]
    async fn test_create_charge_returns_pix_code() {
        let mut server = mockito::Server::new_async().await;
        let id = TransactionId::new();

        let mock = server
            .mock("POST", "/v1/payments")
            .match_header("authorization", "Bearer TEST-1234567890")
            .match_header("x-idempotency-key", format!("recharge-{id}").as_str())
            .match_body(Matcher::PartialJson(serde_json::json!({
                "transaction_amount": 7.0,
                "payment_method_id": "pix",
                "payer": { "email": "ana@example.com" },
                "external_reference": id.to_string(),
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": 123456, "status": "pending",
                    "point_of_interaction": {"transaction_data": {
                        "qr_code": "00020126580014br.gov.bcb.pix", "qr_code_base64": "iVBORw0KGgo="}}}"#,
            )
            .create_async()
            .await;

        let result = gateway(server.url())
            .create_charge(&ChargeRequest {
                transaction_id: id,
                amount: Money::from_major(7),
                currency: Currency::brl(),
                payer: PayerInfo::new("user-1").with_email("ana@example.com"),
                description: "Recharge".into(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.charge_id, "123456");
        assert_eq!(
            result.presentation,
            PresentationData::ScanCode {
                payload: "00020126580014br.gov.bcb.pix".into(),
                image_base64: Some("iVBORw0KGgo=".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_gateway_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/payments/99")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message": "Payment not found", "error": "not_found", "status": 404}"#)
            .create_async()
            .await;

        let err = gateway(server.url()).poll_status("99").await.unwrap_err();
        assert!(matches!(err, SagaError::Gateway(ref m) if m.contains("Payment not found")));
    }

    #[tokio::test]
    async fn test_refund_of_refunded_payment_is_noop() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v1/payments/42")
            .with_status(200)
            .with_body(r#"{"id": 42, "status": "refunded"}"#)
            .create_async()
            .await;
        let refund = server
            .mock("POST", "/v1/payments/42/refunds")
            .expect(0)
            .create_async()
            .await;

        let result = gateway(server.url()).refund("42", None).await.unwrap();
        assert_eq!(result.status, "refunded");
        refund.assert_async().await;
    }

    #[tokio::test]
    async fn test_refund_sends_amount() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v1/payments/42")
            .with_status(200)
            .with_body(r#"{"id": 42, "status": "approved"}"#)
            .create_async()
            .await;
        let refund = server
            .mock("POST", "/v1/payments/42/refunds")
            .match_body(Matcher::Json(serde_json::json!({ "amount": 7.0 })))
            .with_status(201)
            .with_body(r#"{"id": 777, "status": "approved", "amount": 7.0}"#)
            .create_async()
            .await;

        let result = gateway(server.url())
            .refund("42", Some(Money::from_major(7)))
            .await
            .unwrap();
        refund.assert_async().await;
        assert_eq!(result.refund_id, "777");
    }

    #[tokio::test]
    async fn test_declined_payment_cannot_be_refunded() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v1/payments/42")
            .with_status(200)
            .with_body(r#"{"id": 42, "status": "rejected"}"#)
            .create_async()
            .await;

        let err = gateway(server.url()).refund("42", None).await.unwrap_err();
        assert!(matches!(err, SagaError::Gateway(_)));
    }
}
