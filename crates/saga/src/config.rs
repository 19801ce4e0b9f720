//! Saga deadlines and cache settings.

use std::time::Duration;

/// Deadlines and windows used by the orchestrator.
///
/// Reads from environment variables (whole seconds):
/// - `SAGA_TOP_UP_TIMEOUT_SECS` (default: `60`)
/// - `SAGA_REFUND_TIMEOUT_SECS` (default: `30`)
/// - `SAGA_GATEWAY_TIMEOUT_SECS` (default: `30`), charge creation and status polls
/// - `SAGA_DEDUP_WINDOW_SECS` (default: `60`)
/// - `SAGA_ABANDONED_AFTER_SECS` (default: `120`), age at which the sweep
///   picks up a confirmed payment with no run attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub top_up_timeout: Duration,
    pub refund_timeout: Duration,
    pub gateway_timeout: Duration,
    pub dedup_window: Duration,
    pub abandoned_after: Duration,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            top_up_timeout: secs("SAGA_TOP_UP_TIMEOUT_SECS").unwrap_or(defaults.top_up_timeout),
            refund_timeout: secs("SAGA_REFUND_TIMEOUT_SECS").unwrap_or(defaults.refund_timeout),
            gateway_timeout: secs("SAGA_GATEWAY_TIMEOUT_SECS").unwrap_or(defaults.gateway_timeout),
            dedup_window: secs("SAGA_DEDUP_WINDOW_SECS").unwrap_or(defaults.dedup_window),
            abandoned_after: secs("SAGA_ABANDONED_AFTER_SECS").unwrap_or(defaults.abandoned_after),
        }
    }
}

fn secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            top_up_timeout: Duration::from_secs(60),
            refund_timeout: Duration::from_secs(30),
            gateway_timeout: Duration::from_secs(30),
            dedup_window: Duration::from_secs(60),
            abandoned_after: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SagaConfig::default();
        assert_eq!(config.top_up_timeout, Duration::from_secs(60));
        assert_eq!(config.refund_timeout, Duration::from_secs(30));
        assert_eq!(config.dedup_window, Duration::from_secs(60));
        assert!(config.abandoned_after > config.top_up_timeout);
    }

    #[test]
    fn test_unset_or_invalid_values_fall_back() {
        assert_eq!(secs("SAGA_TEST_UNSET_VARIABLE"), None);
    }
}
