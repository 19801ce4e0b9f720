pub mod health;
pub mod metrics;
pub mod operators;
pub mod recharges;
pub mod webhooks;

use std::future::Future;

use saga::SagaError;
use tracing::Instrument;

use crate::error::ApiError;

/// Runs a saga step on its own task.
///
/// A client that hangs up drops the handler future; the step keeps going
/// so a captured payment is never left between charge and top-up.
pub(crate) async fn detached<T, F>(step: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, SagaError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(step.in_current_span())
        .await
        .map_err(|e| ApiError::Saga(SagaError::Critical(format!("saga task failed: {e}"))))?
        .map_err(ApiError::from)
}
