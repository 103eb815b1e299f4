//! The capability contract every supervised subsystem implements.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// A long-running subsystem the [`Orchestrator`](crate::Orchestrator) can host.
///
/// Implementations are shared behind an `Arc`: the orchestrator keeps ownership,
/// the supervisor only holds a reference for the duration of the unit's task.
#[async_trait]
pub trait Service: Send + Sync {
    /// Declared name, used as the supervisor unit name.
    fn name(&self) -> &str;

    /// Run the main work loop until `shutdown` is cancelled or [`stop`](Service::stop)
    /// is called. Fails with [`ServiceError::Precondition`] before doing any work if
    /// the service cannot run; in that case [`is_running`](Service::is_running) must
    /// stay false.
    async fn start(&self, shutdown: CancellationToken) -> Result<(), ServiceError>;

    /// Request graceful termination. Idempotent. Once this returns the service
    /// produces no further observable side effects.
    async fn stop(&self) -> Result<(), ServiceError>;

    /// Non-blocking, side-effect free probe.
    fn is_running(&self) -> bool;
}
