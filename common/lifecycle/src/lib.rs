//! Supervisory skeleton for long-running services: a [`Service`] contract, a
//! [`Supervisor`] that runs services as independently cancellable units with bounded
//! graceful shutdown, and an [`Orchestrator`] that sequences startup, rolls back on
//! failure and exposes a [`HealthSnapshot`] for the HTTP layer.

mod error;
mod health;
mod metrics;
mod orchestrator;
mod service;
mod signals;
mod supervisor;
mod unit;

pub use error::{OrchestratorError, ServiceError, SupervisorError, UnitError};
pub use health::{HealthSnapshot, OverallStatus, ServiceHealth};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorOptions, OrchestratorState, ServiceFactory,
};
pub use service::Service;
pub use signals::wait_for_shutdown_signal;
pub use supervisor::{ShutdownReport, Supervisor};
pub use unit::{UnitState, UnitStatus};

// Re-exported so services can implement `Service::start` without a direct dependency.
pub use tokio_util::sync::CancellationToken;
