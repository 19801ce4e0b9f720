//! API server entry point.

use std::error::Error;
use std::sync::Arc;

use api::config::Config;
use domain::OperatorRegistry;
use ledger::{InMemoryTransactionStore, PostgresTransactionStore, TransactionStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S: TransactionStore + 'static>(
    store: S,
    registry: Arc<OperatorRegistry>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>> {
    let state = api::create_state(store, registry, config)?;
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Load .env, then configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 4. Load the operator registry
    let registry = match &config.registry_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading operator registry");
            OperatorRegistry::from_json_file(path)?
        }
        None => OperatorRegistry::builtin()?,
    };
    let registry = Arc::new(registry);

    // 5. Pick the ledger and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PostgresTransactionStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL ledger");
            serve(store, registry, &config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger");
            serve(InMemoryTransactionStore::new(), registry, &config, metrics_handle).await
        }
    }
}
