//! Error types for services, the supervisor and the orchestrator.

use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::OrchestratorState;

/// Errors a [`Service`](crate::Service) reports from construction, `start` or `stop`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Something the service needs before it can run is missing or invalid.
    #[error("{0}")]
    Precondition(String),

    /// The service's work loop failed while running.
    #[error("{0}")]
    Runtime(String),
}

/// Errors returned synchronously by [`Supervisor::spawn`](crate::Supervisor::spawn).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// A unit with this name is registered and has not terminated yet.
    #[error("unit '{name}' is already running")]
    DuplicateUnit { name: String },
}

/// Why a unit ended up `Errored`. Recorded on the unit for diagnostics, never thrown.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitError {
    /// The unit ignored cancellation for the whole graceful window and was aborted.
    #[error("unit did not terminate within {timeout:?}, aborted")]
    ShutdownTimeout { timeout: Duration },

    /// `start()` returned without an error before cancellation was requested.
    #[error("unit exited before cancellation was requested")]
    Exited,

    /// `start()` returned an error.
    #[error("unit failed: {0}")]
    Failed(ServiceError),

    /// The unit's task panicked.
    #[error("unit panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced to callers of the [`Orchestrator`](crate::Orchestrator) lifecycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// A service failed to construct or spawn; startup was rolled back.
    #[error("failed to start '{unit}': {cause}")]
    Startup { unit: String, cause: String },

    /// A lifecycle operation was called out of order.
    #[error("cannot {operation} while {state}")]
    InvalidLifecycleTransition {
        operation: &'static str,
        state: OrchestratorState,
    },
}
