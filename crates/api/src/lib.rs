//! HTTP API server for the recharge saga.
//!
//! Exposes the saga operations as REST endpoints, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::OperatorRegistry;
use ledger::TransactionStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    DingConnectProvider, InMemoryPaymentGateway, InMemoryTopUpProvider, MercadoPagoGateway,
    PaymentGateway, PaymentGateways, SagaConfig, SagaError, SagaOrchestrator, StripeGateway,
    TopUpProvider,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: TransactionStore> {
    pub saga: SagaOrchestrator<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: TransactionStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/operators", get(routes::operators::list::<S>))
        .route("/operators/detect", get(routes::operators::detect::<S>))
        .route("/recharges", post(routes::recharges::create::<S>))
        .route("/recharges/{id}", get(routes::recharges::get::<S>))
        .route("/recharges/{id}/confirm", post(routes::recharges::confirm::<S>))
        .route("/recharges/{id}/refund", post(routes::recharges::refund::<S>))
        .route("/recharges/{id}/reconcile", post(routes::recharges::reconcile::<S>))
        .route("/recharges/{id}/history", get(routes::recharges::history::<S>))
        .route("/users/{user_id}/recharges", get(routes::recharges::list_for_user::<S>))
        .route("/reconciliation/deferred", post(routes::recharges::reconcile_all::<S>))
        .route("/webhooks/payments", post(routes::webhooks::payment::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// In-memory collaborators backing a sandbox state.
#[derive(Clone)]
pub struct Sandbox {
    pub instant_transfer: InMemoryPaymentGateway,
    pub card: InMemoryPaymentGateway,
    pub provider: InMemoryTopUpProvider,
}

impl Sandbox {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        let instant_transfer = InMemoryPaymentGateway::instant_transfer();
        instant_transfer.set_supported_currencies(vec![domain::Currency::brl()]);
        Self {
            instant_transfer,
            card: InMemoryPaymentGateway::new(),
            provider: InMemoryTopUpProvider::new(registry),
        }
    }
}

/// Creates application state backed entirely by in-memory collaborators.
///
/// The returned [`Sandbox`] shares state with the saga, so callers can steer
/// outcomes and inspect calls.
pub fn create_sandbox_state<S: TransactionStore + 'static>(
    store: S,
    registry: Arc<OperatorRegistry>,
    saga_config: SagaConfig,
) -> (Arc<AppState<S>>, Sandbox) {
    let sandbox = Sandbox::new(Arc::clone(&registry));
    let saga = SagaOrchestrator::new(
        store,
        registry,
        PaymentGateways::new(
            Arc::new(sandbox.instant_transfer.clone()),
            Arc::new(sandbox.card.clone()),
        ),
        Arc::new(sandbox.provider.clone()),
        saga_config,
    );
    (Arc::new(AppState { saga }), sandbox)
}

/// Creates application state from configuration.
///
/// Every collaborator with credentials gets its HTTP adapter; the others
/// fall back to their in-memory sandbox.
pub fn create_state<S: TransactionStore + 'static>(
    store: S,
    registry: Arc<OperatorRegistry>,
    config: &Config,
) -> Result<Arc<AppState<S>>, SagaError> {
    let sandbox = Sandbox::new(Arc::clone(&registry));
    let timeout = config.saga.gateway_timeout;

    let instant_transfer: Arc<dyn PaymentGateway> = match &config.mercadopago {
        Some(settings) => {
            let mut gateway =
                MercadoPagoGateway::new(&settings.base_url, &settings.access_token, timeout)?;
            if let Some(url) = &settings.notification_url {
                gateway = gateway.with_notification_url(url);
            }
            Arc::new(gateway)
        }
        None => {
            tracing::warn!("no MercadoPago credentials, instant transfer runs in sandbox");
            Arc::new(sandbox.instant_transfer)
        }
    };

    let card: Arc<dyn PaymentGateway> = match &config.stripe {
        Some(settings) => Arc::new(StripeGateway::new(
            &settings.base_url,
            &settings.secret_key,
            timeout,
        )?),
        None => {
            tracing::warn!("no Stripe credentials, card payments run in sandbox");
            Arc::new(sandbox.card)
        }
    };

    let provider: Arc<dyn TopUpProvider> = match &config.dingconnect {
        Some(settings) => Arc::new(DingConnectProvider::new(
            &settings.base_url,
            &settings.api_key,
            &settings.api_secret,
            Arc::clone(&registry),
            config.saga.top_up_timeout,
        )?),
        None => {
            tracing::warn!("no DingConnect credentials, top-ups run in sandbox");
            Arc::new(sandbox.provider)
        }
    };

    let saga = SagaOrchestrator::new(
        store,
        registry,
        PaymentGateways::new(instant_transfer, card),
        provider,
        config.saga.clone(),
    );
    Ok(Arc::new(AppState { saga }))
}
