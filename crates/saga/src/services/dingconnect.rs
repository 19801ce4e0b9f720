//! Top-up provider over the DingConnect transfer API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{Currency, Money, OperatorRegistry};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::topup::{TopUpProvider, TopUpResult, TransferState};
use crate::error::SagaError;

pub const DEFAULT_BASE_URL: &str = "https://api.dingconnect.com";

const MIN_KEY_LEN: usize = 20;
const MIN_SECRET_LEN: usize = 40;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendTransferBody<'a> {
    operator_id: u32,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    phone_number: &'a str,
    reference: &'a str,
    country_code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendTransferResponse {
    transaction_id: Option<serde_json::Value>,
    status: Option<String>,
    #[serde(default)]
    is_deferred: bool,
    correlation_id: Option<String>,
    operator_transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListTransferRecordsBody<'a> {
    correlation_id: &'a str,
    take: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListTransferRecordsResponse {
    #[serde(default)]
    items: Vec<TransferRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TransferRecord {
    transaction_id: Option<serde_json::Value>,
    status: String,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Error", alias = "ErrorCode")]
    error: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

fn id_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn is_failed(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "failed" | "cancelled" | "canceled" | "rejected"
    )
}

fn is_complete(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "complete" | "completed" | "success" | "successful"
    )
}

/// Top-ups through DingConnect.
///
/// Operator ids are mapped to DingConnect provider codes through the
/// registry, and phone digits are checked before anything is sent.
#[derive(Debug, Clone)]
pub struct DingConnectProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    registry: Arc<OperatorRegistry>,
}

impl DingConnectProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        registry: Arc<OperatorRegistry>,
        timeout: Duration,
    ) -> Result<Self, SagaError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.len() < MIN_KEY_LEN || api_secret.len() < MIN_SECRET_LEN {
            return Err(SagaError::Configuration(format!(
                "DingConnect credentials look invalid (key needs {MIN_KEY_LEN}+ chars, secret {MIN_SECRET_LEN}+)"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            registry,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("X-API-Secret", &self.api_secret)
            .header("Accept", "application/json")
    }
}

fn transport(err: reqwest::Error) -> SagaError {
    SagaError::Provider(format!("DingConnect request failed: {err}"))
}

#[async_trait]
impl TopUpProvider for DingConnectProvider {
    fn name(&self) -> &'static str {
        "dingconnect"
    }

    #[tracing::instrument(skip(self, phone), fields(provider = "dingconnect"))]
    async fn perform_top_up(
        &self,
        phone: &str,
        operator_id: &str,
        amount: Money,
        currency: &Currency,
        reference: &str,
    ) -> Result<TopUpResult, SagaError> {
        let destination = self.registry.validate_destination(phone, operator_id)?;

        let body = SendTransferBody {
            operator_id: destination.operator.provider_code,
            amount: amount.to_decimal(),
            currency: currency.as_str(),
            phone_number: &destination.phone_digits,
            reference,
            country_code: &destination.operator.country,
        };

        let response = self
            .post("/api/V1/SendTransfer")
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let error: Option<ErrorBody> = response.json().await.ok();
            let (code, message) = match error {
                Some(ErrorBody { error, message }) => (error, message),
                None => (None, None),
            };
            tracing::warn!(status = status.as_u16(), ?code, "DingConnect rejected transfer");
            return Ok(TopUpResult::rejected(
                code.unwrap_or_else(|| "RECHARGE_FAILED".to_string()),
                message.unwrap_or_else(|| format!("DingConnect returned {}", status.as_u16())),
            ));
        }

        let transfer: SendTransferResponse = response
            .json()
            .await
            .map_err(|e| SagaError::Provider(format!("DingConnect response: {e}")))?;

        if let Some(status) = transfer.status.as_deref()
            && is_failed(status)
        {
            return Ok(TopUpResult::rejected(
                status.to_ascii_uppercase(),
                format!("DingConnect reported transfer {status}"),
            ));
        }

        Ok(TopUpResult {
            success: true,
            provider_transaction_id: transfer
                .transaction_id
                .map(id_string)
                .or(transfer.operator_transaction_id),
            is_deferred: transfer.is_deferred,
            correlation_id: transfer.correlation_id,
            error_code: None,
            error_message: None,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn transfer_status(&self, correlation_id: &str) -> Result<TransferState, SagaError> {
        let response = self
            .post("/api/V1/ListTransferRecords")
            .json(&ListTransferRecordsBody {
                correlation_id,
                take: 1,
            })
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(SagaError::Provider(format!(
                "DingConnect returned {} for transfer lookup",
                response.status().as_u16()
            )));
        }

        let records: ListTransferRecordsResponse = response
            .json()
            .await
            .map_err(|e| SagaError::Provider(format!("DingConnect response: {e}")))?;
        let Some(record) = records.items.into_iter().next() else {
            return Err(SagaError::Provider(format!("No transfer found for {correlation_id}")));
        };

        Ok(if is_complete(&record.status) {
            TransferState::Completed {
                provider_transaction_id: record.transaction_id.map(id_string),
            }
        } else if is_failed(&record.status) {
            TransferState::Failed {
                message: record
                    .error_message
                    .unwrap_or_else(|| format!("transfer {}", record.status)),
            }
        } else {
            TransferState::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ValidationError;
    use mockito::Matcher;

    const KEY: &str = "dk_0123456789abcdefghij";
    const SECRET: &str = "ds_0123456789abcdefghij0123456789abcdefghij";

    fn provider(url: String) -> DingConnectProvider {
        DingConnectProvider::new(
            url,
            KEY,
            SECRET,
            Arc::new(OperatorRegistry::builtin().unwrap()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_short_credentials_are_rejected() {
        let result = DingConnectProvider::new(
            DEFAULT_BASE_URL,
            "short",
            SECRET,
            Arc::new(OperatorRegistry::builtin().unwrap()),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(SagaError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_send_transfer_maps_operator_code() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/V1/SendTransfer")
            .match_header("authorization", format!("Bearer {KEY}").as_str())
            .match_header("x-api-secret", SECRET)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "OperatorId": 174,
                "Amount": 5.0,
                "Currency": "BRL",
                "PhoneNumber": "37123456",
                "Reference": "tx-1",
                "CountryCode": "HT",
            })))
            .with_status(200)
            .with_body(r#"{"TransactionId": 98765, "Status": "Complete", "IsDeferred": false}"#)
            .create_async()
            .await;

        let result = provider(server.url())
            .perform_top_up("+509 3712 3456", "NMHT", Money::from_major(5), &Currency::brl(), "tx-1")
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.provider_transaction_id.as_deref(), Some("98765"));
    }

    #[tokio::test]
    async fn test_deferred_transfer_carries_correlation_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/V1/SendTransfer")
            .with_status(200)
            .with_body(
                r#"{"TransactionId": "T-1", "Status": "Submitted", "IsDeferred": true, "CorrelationId": "C-1"}"#,
            )
            .create_async()
            .await;

        let result = provider(server.url())
            .perform_top_up("8095551234", "D8DO", Money::from_major(50), &Currency::brl(), "tx-2")
            .await
            .unwrap();

        assert!(result.success && result.is_deferred);
        assert_eq!(result.correlation_id.as_deref(), Some("C-1"));
    }

    #[tokio::test]
    async fn test_http_error_is_unsuccessful_result() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/V1/SendTransfer")
            .with_status(400)
            .with_body(r#"{"error": "InsufficientBalance", "message": "Account balance too low"}"#)
            .create_async()
            .await;

        let result = provider(server.url())
            .perform_top_up("37123456", "NMHT", Money::from_major(5), &Currency::brl(), "tx-3")
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("InsufficientBalance"));
        assert_eq!(result.failure_reason(), "Account balance too low (InsufficientBalance)");
    }

    #[tokio::test]
    async fn test_malformed_phone_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/V1/SendTransfer")
            .expect(0)
            .create_async()
            .await;

        let result = provider(server.url())
            .perform_top_up("809555", "D8DO", Money::from_major(50), &Currency::brl(), "tx-4")
            .await;

        assert!(matches!(
            result,
            Err(SagaError::Validation(ValidationError::InvalidPhone { .. }))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transfer_status_lookup() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/V1/ListTransferRecords")
            .match_body(Matcher::PartialJson(serde_json::json!({ "CorrelationId": "C-1" })))
            .with_status(200)
            .with_body(r#"{"Items": [{"TransactionId": "T-1", "Status": "Completed"}]}"#)
            .create_async()
            .await;

        let state = provider(server.url()).transfer_status("C-1").await.unwrap();
        assert_eq!(
            state,
            TransferState::Completed {
                provider_transaction_id: Some("T-1".into())
            }
        );
    }
}
