//! Task supervisor: runs services as independently cancellable background units.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SupervisorError, UnitError};
use crate::metrics;
use crate::service::Service;
use crate::unit::{UnitCell, UnitState, UnitStatus};

struct Unit {
    cell: Arc<UnitCell>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Outcome of [`Supervisor::cancel_all`]. Unit names are sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Units that honoured cancellation (or had already terminated).
    pub terminated: Vec<String>,
    /// Units aborted after the graceful window expired.
    pub timed_out: Vec<String>,
    /// Units that ended `Errored` for any other reason.
    pub errored: Vec<String>,
}

impl ShutdownReport {
    /// True when every unit terminated cooperatively.
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.errored.is_empty()
    }

    fn record(&mut self, name: String, status: &UnitStatus) {
        match (status.state, &status.error) {
            (UnitState::Errored, Some(UnitError::ShutdownTimeout { .. })) => {
                self.timed_out.push(name)
            }
            (UnitState::Errored, _) => self.errored.push(name),
            _ => self.terminated.push(name),
        }
    }

    fn sort(&mut self) {
        self.terminated.sort();
        self.timed_out.sort();
        self.errored.sort();
    }
}

/// Owns the background units. Safe to share: `spawn` and `cancel_all` hold the unit
/// table lock only briefly, and `status` never waits on a unit.
pub struct Supervisor {
    name: String,
    units: RwLock<HashMap<String, Unit>>,
}

impl Supervisor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            units: RwLock::new(HashMap::new()),
        }
    }

    /// Register `service` under `name` and run its `start()` on a new task.
    /// Returns immediately; must be called from within a tokio runtime.
    pub fn spawn(&self, name: &str, service: Arc<dyn Service>) -> Result<(), SupervisorError> {
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = units.get(name) {
            if !existing.cell.state().is_terminal() {
                return Err(SupervisorError::DuplicateUnit {
                    name: name.to_owned(),
                });
            }
        }

        let cell = Arc::new(UnitCell::new());
        let token = CancellationToken::new();
        let task = tokio::spawn(run_unit(
            name.to_owned(),
            service,
            cell.clone(),
            token.clone(),
        ));

        units.insert(
            name.to_owned(),
            Unit {
                cell,
                token,
                task: Some(task),
            },
        );

        metrics::emit_unit_spawned(&self.name, name);
        debug!(unit = %name, "Lifecycle: unit spawned");
        Ok(())
    }

    /// Signal cancellation to every live unit, then wait up to `timeout` for all of them.
    /// Units still running at the deadline are aborted and marked
    /// `Errored(ShutdownTimeout)`. Always returns within `timeout`.
    pub async fn cancel_all(&self, timeout: Duration) -> ShutdownReport {
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        let mut waiting = Vec::new();

        {
            let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
            for (name, unit) in units.iter_mut() {
                let status = unit.cell.status();
                if status.state.is_terminal() {
                    report.record(name.clone(), &status);
                    continue;
                }
                unit.cell.advance(UnitState::Cancelling);
                unit.token.cancel();
                if let Some(task) = unit.task.take() {
                    waiting.push((name.clone(), unit.cell.clone(), task));
                }
            }
        }

        info!(
            units = waiting.len(),
            timeout_secs = timeout.as_secs_f64(),
            "Lifecycle: cancellation signalled, waiting for units"
        );

        for (name, cell, mut task) in waiting {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    cell.fail(UnitError::Panicked(join_error.to_string()));
                }
                Err(_) => {
                    task.abort();
                    if cell.fail(UnitError::ShutdownTimeout { timeout }) {
                        warn!(
                            unit = %name,
                            timeout_secs = timeout.as_secs_f64(),
                            result = "timeout",
                            "Lifecycle: unit did not terminate in time, aborted"
                        );
                    }
                }
            }

            let status = cell.status();
            let result = match status.state {
                UnitState::Terminated => "terminated",
                _ => "errored",
            };
            metrics::emit_unit_shutdown_result(&self.name, &name, result);
            report.record(name, &status);
        }

        report.sort();
        let elapsed = clock.elapsed();
        metrics::emit_shutdown_duration(&self.name, report.is_clean(), elapsed.as_secs_f64());
        if report.is_clean() {
            info!(
                clean = true,
                duration_secs = elapsed.as_secs_f64(),
                "Lifecycle: all units terminated"
            );
        } else {
            warn!(
                clean = false,
                duration_secs = elapsed.as_secs_f64(),
                timed_out = ?report.timed_out,
                errored = ?report.errored,
                "Lifecycle: units terminated with failures"
            );
        }
        report
    }

    /// Current state of every registered unit, keyed by name.
    pub fn status(&self) -> BTreeMap<String, UnitStatus> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, unit)| (name.clone(), unit.cell.status()))
            .collect()
    }

    pub fn unit_state(&self, name: &str) -> Option<UnitState> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|unit| unit.cell.state())
    }
}

async fn run_unit(
    name: String,
    service: Arc<dyn Service>,
    cell: Arc<UnitCell>,
    token: CancellationToken,
) {
    cell.advance(UnitState::Running);

    // The service gets a child token: cancelling it does not count as a shutdown request.
    let result = AssertUnwindSafe(service.start(token.child_token()))
        .catch_unwind()
        .await;

    match result {
        // Only succeeds once cancel_all has moved the unit to Cancelling.
        Ok(Ok(())) if cell.advance(UnitState::Terminated) => {
            debug!(unit = %name, "Lifecycle: unit terminated");
        }
        Ok(Ok(())) => {
            warn!(unit = %name, "Lifecycle: unit exited before cancellation");
            cell.fail(UnitError::Exited);
        }
        Ok(Err(e)) => {
            warn!(unit = %name, error = %e, "Lifecycle: unit failed");
            cell.fail(UnitError::Failed(e));
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            warn!(unit = %name, reason = %reason, "Lifecycle: unit panicked");
            cell.fail(UnitError::Panicked(reason));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
