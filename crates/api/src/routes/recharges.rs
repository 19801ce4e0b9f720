//! Recharge endpoints: start, confirm, refund, reconcile and read.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{TransactionId, UserId};
use domain::{Money, PayerInfo, PaymentMethod, RechargeRequest, Transaction};
use ledger::{StatusTransition, TransactionStore};
use rust_decimal::Decimal;
use saga::{PresentationData, ReconciliationReport, SagaError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::detached;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateRechargeRequest {
    pub user_id: String,
    pub email: Option<String>,
    pub origin_country: String,
    pub phone_number: String,
    pub operator_id: String,
    /// Face value in the origin country's currency, e.g. `5` or `"2.78"`.
    pub face_amount: Decimal,
    pub payment_method: PaymentMethod,
}

#[derive(Deserialize, Default)]
pub struct ConfirmRequest {
    /// Charge id as the client knows it. Checked against the ledger, never trusted.
    pub payment_id: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct RefundRequest {
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct RechargeResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub phone_number: String,
    pub operator_id: String,
    pub origin_country: String,
    pub face_amount: String,
    pub amount: String,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub correlation_id: Option<String>,
    pub refund_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Transaction> for RechargeResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            user_id: tx.user_id.to_string(),
            status: tx.status.to_string(),
            phone_number: tx.phone_number,
            operator_id: tx.operator_id,
            origin_country: tx.origin_country,
            face_amount: tx.face_amount.to_string(),
            amount: tx.amount.to_string(),
            currency: tx.currency.to_string(),
            payment_method: tx.payment_method,
            payment_id: tx.payment_id,
            provider_transaction_id: tx.provider_transaction_id,
            correlation_id: tx.correlation_id,
            refund_id: tx.refund_id,
            error_message: tx.error_message,
            created_at: tx.created_at.to_rfc3339(),
            updated_at: tx.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct RechargeCreatedResponse {
    pub transaction: RechargeResponse,
    pub presentation: Option<PresentationData>,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub from: Option<String>,
    pub to: String,
    pub note: Option<String>,
    pub at: String,
}

impl From<StatusTransition> for TransitionResponse {
    fn from(t: StatusTransition) -> Self {
        Self {
            from: t.from.map(|s| s.to_string()),
            to: t.to.to_string(),
            note: t.note,
            at: t.at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /recharges: validate, record and create the payment charge.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateRechargeRequest>,
) -> Result<(StatusCode, Json<RechargeCreatedResponse>), ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    let face_amount = Money::from_decimal(req.face_amount)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut payer = PayerInfo::new(req.user_id);
    if let Some(email) = req.email {
        payer = payer.with_email(email);
    }

    let request = RechargeRequest {
        origin_country: req.origin_country,
        phone_number: req.phone_number,
        operator_id: req.operator_id,
        face_amount,
        payment_method: req.payment_method,
    };

    let initiated = state.saga.process_recharge(request, payer).await?;

    Ok((
        StatusCode::CREATED,
        Json(RechargeCreatedResponse {
            transaction: initiated.transaction.into(),
            presentation: initiated.presentation,
        }),
    ))
}

/// GET /recharges/{id}: load a recharge record.
#[tracing::instrument(skip(state))]
pub async fn get<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<RechargeResponse>, ApiError> {
    let tx = load(&state, &id).await?;
    Ok(Json(tx.into()))
}

/// POST /recharges/{id}/confirm: re-verify the payment and deliver the top-up.
#[tracing::instrument(skip(state, body))]
pub async fn confirm<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RechargeResponse>, ApiError> {
    let body: ConfirmRequest = parse_optional_body(&body)?;
    let tx = load(&state, &id).await?;
    let payment_id = advisory_payment_id(&tx, body.payment_id)?;

    let tx = detached(async move {
        state
            .saga
            .confirm_and_recharge(tx.id, &payment_id, &tx.request())
            .await
    })
    .await?;
    Ok(Json(tx.into()))
}

/// POST /recharges/{id}/refund: compensate a recharge whose top-up failed.
#[tracing::instrument(skip(state, body))]
pub async fn refund<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RechargeResponse>, ApiError> {
    let body: RefundRequest = parse_optional_body(&body)?;
    let tx = load(&state, &id).await?;
    let payment_id = advisory_payment_id(&tx, None)?;
    let reason = body
        .reason
        .unwrap_or_else(|| "refund requested by operator".to_string());

    let tx = detached(async move {
        state
            .saga
            .process_refund(tx.id, &payment_id, &tx.request(), &reason)
            .await
    })
    .await?;
    Ok(Json(tx.into()))
}

/// POST /recharges/{id}/reconcile: settle a deferred top-up.
#[tracing::instrument(skip(state))]
pub async fn reconcile<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<RechargeResponse>, ApiError> {
    let id = parse_transaction_id(&id)?;
    let tx = detached(async move { state.saga.reconcile_deferred(id).await }).await?;
    Ok(Json(tx.into()))
}

/// POST /reconciliation/deferred: settle deferred top-ups and resume
/// abandoned confirmations.
#[tracing::instrument(skip(state))]
pub async fn reconcile_all<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ReconciliationReport>, ApiError> {
    let report = detached(async move { state.saga.reconcile_all_deferred().await }).await?;
    Ok(Json(report))
}

/// GET /recharges/{id}/history: status audit trail, oldest first.
#[tracing::instrument(skip(state))]
pub async fn history<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransitionResponse>>, ApiError> {
    let tx = load(&state, &id).await?;
    let history = state.saga.store().history(tx.id).await?;
    Ok(Json(history.into_iter().map(Into::into).collect()))
}

/// GET /users/{user_id}/recharges: a user's recharges, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<RechargeResponse>>, ApiError> {
    let records = state.saga.store().list_by_user(&UserId::new(user_id)).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

async fn load<S: TransactionStore>(
    state: &AppState<S>,
    id: &str,
) -> Result<Transaction, ApiError> {
    let id = parse_transaction_id(id)?;
    state
        .saga
        .store()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Recharge {id} not found")))
}

/// Picks the payment id handed to the saga: the caller's if given, else the ledger's.
fn advisory_payment_id(tx: &Transaction, supplied: Option<String>) -> Result<String, ApiError> {
    supplied
        .or_else(|| tx.payment_id.clone())
        .ok_or_else(|| {
            ApiError::Saga(SagaError::InvalidState(format!(
                "transaction {} has no payment yet",
                tx.id
            )))
        })
}

/// Parses a JSON body that may be omitted entirely.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

fn parse_transaction_id(id: &str) -> Result<TransactionId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
