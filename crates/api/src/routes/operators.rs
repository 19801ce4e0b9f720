//! Operator catalog and number-prefix detection.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use domain::{Currency, Operator};
use ledger::TransactionStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    /// Destination country code, e.g. `HT`. Every operator when absent.
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetectQuery {
    pub country: String,
    pub phone: String,
}

#[derive(Serialize)]
pub struct OperatorResponse {
    pub id: String,
    pub name: String,
    pub country: String,
    pub provider_code: u32,
    /// Deliverable range, in `currency`.
    pub min_amount: String,
    pub max_amount: String,
    pub currency: String,
}

impl OperatorResponse {
    fn new(op: &Operator, settlement: &Currency) -> Self {
        Self {
            id: op.id.clone(),
            name: op.name.clone(),
            country: op.country.clone(),
            provider_code: op.provider_code,
            min_amount: op.min_amount.to_string(),
            max_amount: op.max_amount.to_string(),
            currency: settlement.to_string(),
        }
    }
}

/// GET /operators?country=HT: operators the provider can deliver to.
#[tracing::instrument(skip(state))]
pub async fn list<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<CatalogQuery>,
) -> Json<Vec<OperatorResponse>> {
    let registry = state.saga.registry();
    let settlement = registry.settlement_currency();
    Json(
        registry
            .catalog(query.country.as_deref())
            .into_iter()
            .map(|op| OperatorResponse::new(op, settlement))
            .collect(),
    )
}

/// GET /operators/detect?country=HT&phone=37123456: operator owning a number prefix.
#[tracing::instrument(skip(state))]
pub async fn detect<S: TransactionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<DetectQuery>,
) -> Result<Json<OperatorResponse>, ApiError> {
    let registry = state.saga.registry();
    let operator = registry
        .detect_operator(&query.country, &query.phone)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No operator in {} uses the prefix of {}",
                query.country, query.phone
            ))
        })?;
    Ok(Json(OperatorResponse::new(
        operator,
        registry.settlement_currency(),
    )))
}
