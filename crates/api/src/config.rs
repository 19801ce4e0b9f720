//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use saga::SagaConfig;

/// MercadoPago (instant transfer) credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MercadoPagoSettings {
    pub base_url: String,
    pub access_token: String,
    pub notification_url: Option<String>,
}

/// Stripe (card) credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSettings {
    pub base_url: String,
    pub secret_key: String,
}

/// DingConnect (top-up) credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DingConnectSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL ledger; the in-memory ledger is used when unset
/// - `RECHARGE_REGISTRY_FILE`: operator registry JSON; the built-in table when unset
/// - `MERCADOPAGO_ACCESS_TOKEN`, `MERCADOPAGO_BASE_URL`, `MERCADOPAGO_NOTIFICATION_URL`
/// - `STRIPE_SECRET_KEY`, `STRIPE_BASE_URL`
/// - `DINGCONNECT_API_KEY`, `DINGCONNECT_API_SECRET`, `DINGCONNECT_BASE_URL`
/// - `SAGA_*_SECS`: see [`SagaConfig::from_env`]
///
/// A collaborator without credentials runs against its in-memory sandbox.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub registry_file: Option<PathBuf>,
    pub mercadopago: Option<MercadoPagoSettings>,
    pub stripe: Option<StripeSettings>,
    pub dingconnect: Option<DingConnectSettings>,
    pub saga: SagaConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let mercadopago = var("MERCADOPAGO_ACCESS_TOKEN").map(|access_token| MercadoPagoSettings {
            base_url: var("MERCADOPAGO_BASE_URL")
                .unwrap_or_else(|| saga::services::mercadopago::DEFAULT_BASE_URL.to_string()),
            access_token,
            notification_url: var("MERCADOPAGO_NOTIFICATION_URL"),
        });

        let stripe = var("STRIPE_SECRET_KEY").map(|secret_key| StripeSettings {
            base_url: var("STRIPE_BASE_URL")
                .unwrap_or_else(|| saga::services::stripe::DEFAULT_BASE_URL.to_string()),
            secret_key,
        });

        let dingconnect = match (var("DINGCONNECT_API_KEY"), var("DINGCONNECT_API_SECRET")) {
            (Some(api_key), Some(api_secret)) => Some(DingConnectSettings {
                base_url: var("DINGCONNECT_BASE_URL")
                    .unwrap_or_else(|| saga::services::dingconnect::DEFAULT_BASE_URL.to_string()),
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000),
            log_level: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            database_url: var("DATABASE_URL"),
            registry_file: var("RECHARGE_REGISTRY_FILE").map(PathBuf::from),
            mercadopago,
            stripe,
            dingconnect,
            saga: SagaConfig::from_env(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            registry_file: None,
            mercadopago: None,
            stripe: None,
            dingconnect: None,
            saga: SagaConfig::default(),
        }
    }
}
