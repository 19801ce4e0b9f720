//! Payment gateway notification endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger::TransactionStore;
use saga::PaymentNotification;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::detached;

#[derive(Serialize)]
pub struct NotificationResponse {
    /// False when no recharge holds the notified charge.
    pub matched: bool,
    pub transaction_id: Option<String>,
    pub status: Option<String>,
}

/// POST /webhooks/payments: re-verify the recharge a notification points at.
///
/// Unknown charges are acknowledged so the gateway stops retrying.
#[tracing::instrument(skip(state, notification))]
pub async fn payment<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<NotificationResponse>, ApiError> {
    let tx = detached(async move { state.saga.handle_payment_notification(&notification).await })
        .await?;

    Ok(Json(match tx {
        Some(tx) => NotificationResponse {
            matched: true,
            transaction_id: Some(tx.id.to_string()),
            status: Some(tx.status.to_string()),
        },
        None => NotificationResponse {
            matched: false,
            transaction_id: None,
            status: None,
        },
    }))
}
