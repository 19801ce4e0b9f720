//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger::TransactionStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Saga runs currently holding a transaction.
    pub in_flight: usize,
}

/// GET /health: process liveness and saga load.
pub async fn check<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        in_flight: state.saga.guard().active_count(),
    })
}
