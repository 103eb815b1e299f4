//! Application orchestrator: builds services, drives startup ordering and rollback,
//! delegates supervision to the [`Supervisor`] and exposes a health snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, ServiceError};
use crate::health::{HealthSnapshot, ServiceHealth};
use crate::metrics;
use crate::service::Service;
use crate::supervisor::{ShutdownReport, Supervisor};

/// Fallible constructor for one service, run inside [`Orchestrator::startup`].
pub type ServiceFactory =
    Box<dyn FnOnce() -> Result<Arc<dyn Service>, ServiceError> + Send + 'static>;

/// `Uninitialized -> Starting -> Running -> Stopping -> Stopped`, with `Failed`
/// entered when startup rolls back. `Stopped` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OrchestratorState {
    Uninitialized = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl OrchestratorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OrchestratorState::Uninitialized,
            1 => OrchestratorState::Starting,
            2 => OrchestratorState::Running,
            3 => OrchestratorState::Stopping,
            4 => OrchestratorState::Stopped,
            _ => OrchestratorState::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrchestratorState::Uninitialized => "uninitialized",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Running => "running",
            OrchestratorState::Stopping => "stopping",
            OrchestratorState::Stopped => "stopped",
            OrchestratorState::Failed => "failed",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for creating an orchestrator.
#[derive(Clone, Debug)]
pub struct OrchestratorOptions {
    pub environment: String,
    pub version: String,
    /// Graceful window given to units by `cancel_all` before they are aborted.
    pub shutdown_timeout: Duration,
    /// Bound on the explicit `stop()` phase that follows cancellation.
    pub stop_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            version: "unknown".to_string(),
            shutdown_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

pub struct OrchestratorBuilder {
    name: String,
    options: OrchestratorOptions,
    services: Vec<(String, ServiceFactory)>,
}

impl OrchestratorBuilder {
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.options.environment = environment.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.options.version = version.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.shutdown_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.options.stop_timeout = timeout;
        self
    }

    /// Declare a service. Services are constructed and spawned in declaration order.
    pub fn with_service<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Service>, ServiceError> + Send + 'static,
    {
        self.services.push((name.into(), Box::new(factory)));
        self
    }

    pub fn build(self) -> Orchestrator {
        let (declared, factories): (Vec<String>, Vec<ServiceFactory>) =
            self.services.into_iter().unzip();
        Orchestrator {
            supervisor: Supervisor::new(&self.name),
            name: self.name,
            options: self.options,
            state: AtomicU8::new(OrchestratorState::Uninitialized as u8),
            declared,
            factories: Mutex::new(factories),
            services: RwLock::new(Vec::new()),
        }
    }
}

/// One instance per process, shared by reference (`Arc`) with the HTTP layer.
///
/// Lifecycle calls are guarded by compare-and-swap on the state, so concurrent
/// `startup`/`shutdown` calls cannot interleave; `health` and `state` never wait
/// on a transition in progress.
pub struct Orchestrator {
    name: String,
    options: OrchestratorOptions,
    state: AtomicU8,
    declared: Vec<String>,
    factories: Mutex<Vec<ServiceFactory>>,
    /// Constructed services, index-aligned with `declared`.
    services: RwLock<Vec<Arc<dyn Service>>>,
    supervisor: Supervisor,
}

impl Orchestrator {
    pub fn builder(name: &str) -> OrchestratorBuilder {
        OrchestratorBuilder {
            name: name.to_owned(),
            options: OrchestratorOptions::default(),
            services: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn state(&self) -> OrchestratorState {
        OrchestratorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Construct and spawn every declared service in order. On the first failure the
    /// services started so far are cancelled and stopped, the orchestrator moves to
    /// `Failed`, and a [`OrchestratorError::Startup`] naming the service is returned.
    pub async fn startup(&self) -> Result<(), OrchestratorError> {
        self.transition(
            OrchestratorState::Uninitialized,
            OrchestratorState::Starting,
            "startup",
        )?;
        info!(
            app = %self.name,
            services = self.declared.len(),
            "Lifecycle: starting"
        );

        let factories = std::mem::take(
            &mut *self
                .factories
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for (declared, factory) in self.declared.iter().zip(factories) {
            let service = match factory() {
                Ok(service) => service,
                Err(e) => return Err(self.rollback(declared, e.to_string()).await),
            };

            if let Err(e) = self.supervisor.spawn(service.name(), service.clone()) {
                return Err(self.rollback(declared, e.to_string()).await);
            }

            self.services
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(service);
            debug!(service = %declared, "Lifecycle: service started");
        }

        self.set_state(OrchestratorState::Running);
        metrics::emit_startup(&self.name, "success");
        info!(app = %self.name, "Lifecycle: startup complete");
        Ok(())
    }

    /// Cancel every unit, wait up to the shutdown timeout, then `stop()` every service.
    /// Per-service failures are logged and reflected in the returned report; the only
    /// error is calling this while not `Running`.
    pub async fn shutdown(&self) -> Result<ShutdownReport, OrchestratorError> {
        self.transition(
            OrchestratorState::Running,
            OrchestratorState::Stopping,
            "shutdown",
        )?;
        let clock = Instant::now();
        info!(app = %self.name, "Lifecycle: shutting down");

        let report = self
            .supervisor
            .cancel_all(self.options.shutdown_timeout)
            .await;
        self.stop_services().await;

        self.set_state(OrchestratorState::Stopped);
        if report.is_clean() {
            info!(
                clean = true,
                total_duration_secs = clock.elapsed().as_secs_f64(),
                "Lifecycle: shutdown complete"
            );
        } else {
            warn!(
                clean = false,
                total_duration_secs = clock.elapsed().as_secs_f64(),
                "Lifecycle: shutdown complete with failures"
            );
        }
        Ok(report)
    }

    /// Callable in any state. Before startup and once stopped or failed, every service
    /// reports not running, even one whose `stop()` never returned.
    pub fn health(&self) -> HealthSnapshot {
        let state = self.state();
        let constructed = match state {
            OrchestratorState::Uninitialized
            | OrchestratorState::Stopped
            | OrchestratorState::Failed => Vec::new(),
            OrchestratorState::Starting
            | OrchestratorState::Running
            | OrchestratorState::Stopping => self
                .services
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };

        let services = self
            .declared
            .iter()
            .enumerate()
            .map(|(i, name)| ServiceHealth {
                name: name.clone(),
                running: constructed
                    .get(i)
                    .map(|service| service.is_running())
                    .unwrap_or(false),
            })
            .collect();

        HealthSnapshot::new(
            state,
            services,
            self.supervisor.status(),
            self.options.environment.clone(),
            self.options.version.clone(),
        )
    }

    async fn rollback(&self, unit: &str, cause: String) -> OrchestratorError {
        warn!(
            service = %unit,
            cause = %cause,
            "Lifecycle: startup failed, rolling back started services"
        );
        self.supervisor
            .cancel_all(self.options.shutdown_timeout)
            .await;
        self.stop_services().await;
        self.set_state(OrchestratorState::Failed);
        metrics::emit_startup(&self.name, "failure");

        OrchestratorError::Startup {
            unit: unit.to_owned(),
            cause,
        }
    }

    /// Calls `stop()` on every constructed service concurrently, bounded by the stop timeout.
    async fn stop_services(&self) {
        let services = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let stops = services.iter().map(|service| async move {
            let result = service.stop().await;
            (service.name().to_owned(), result)
        });

        match tokio::time::timeout(self.options.stop_timeout, join_all(stops)).await {
            Ok(results) => {
                for (name, result) in results {
                    if let Err(e) = result {
                        warn!(service = %name, error = %e, "Lifecycle: service stop failed");
                    }
                }
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.options.stop_timeout.as_secs_f64(),
                    "Lifecycle: services did not stop in time"
                );
            }
        }
    }

    fn transition(
        &self,
        from: OrchestratorState,
        to: OrchestratorState,
        operation: &'static str,
    ) -> Result<(), OrchestratorError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| OrchestratorError::InvalidLifecycleTransition {
                operation,
                state: OrchestratorState::from_u8(actual),
            })
    }

    fn set_state(&self, state: OrchestratorState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
