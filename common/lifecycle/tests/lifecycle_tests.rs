use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lifecycle::{
    CancellationToken, Orchestrator, OrchestratorError, OrchestratorState, OverallStatus,
    Service, ServiceError, Supervisor, SupervisorError, UnitError, UnitState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Behavior {
    /// Runs until cancelled.
    Cooperative,
    /// Runs until cancelled, then takes `Duration` to wind down.
    SlowToCancel(Duration),
    /// Never returns from start(), even when cancelled.
    IgnoresCancel,
    /// start() fails before doing any work.
    FailsOnStart(String),
    /// start() returns Ok on its own.
    ExitsEarly,
    /// Cancels the token it was handed, then returns Ok.
    CancelsOwnToken,
    Panics,
    /// Cooperative, but stop() never returns.
    HangsOnStop,
}

/// Test double recording how the orchestrator drives it.
struct TestService {
    name: String,
    behavior: Behavior,
    running: AtomicBool,
    stop_calls: AtomicUsize,
}

impl TestService {
    fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            running: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        })
    }

    fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for TestService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        if let Behavior::FailsOnStart(reason) = &self.behavior {
            return Err(ServiceError::Precondition(reason.clone()));
        }
        self.running.store(true, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Cooperative | Behavior::HangsOnStop => shutdown.cancelled().await,
            Behavior::SlowToCancel(delay) => {
                shutdown.cancelled().await;
                tokio::time::sleep(*delay).await;
            }
            Behavior::IgnoresCancel => std::future::pending::<()>().await,
            Behavior::ExitsEarly => {
                self.running.store(false, Ordering::SeqCst);
            }
            Behavior::CancelsOwnToken => {
                shutdown.cancel();
                self.running.store(false, Ordering::SeqCst);
            }
            Behavior::Panics => panic!("boom"),
            Behavior::FailsOnStart(_) => unreachable!(),
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Behavior::HangsOnStop = self.behavior {
            std::future::pending::<()>().await;
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn shared(service: &Arc<TestService>) -> Arc<dyn Service> {
    service.clone()
}

/// Orchestrator with short timeouts so misbehaving doubles don't slow the suite.
fn test_orchestrator(services: &[Arc<TestService>]) -> Orchestrator {
    services.iter().fold(
        Orchestrator::builder("test")
            .with_environment("test")
            .with_version("1.0.0")
            .with_shutdown_timeout(Duration::from_millis(200))
            .with_stop_timeout(Duration::from_millis(200)),
        |builder, service| {
            let service = shared(service);
            builder.with_service(service.name().to_string(), move || Ok(service))
        },
    )
    .build()
}

async fn assert_or_retry<F>(check: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check())
}

// ---------------------------------------------------------------------------
// Section 1: Supervisor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawned_unit_runs_and_terminates_on_cancel() {
    let supervisor = Supervisor::new("test");
    let service = TestService::new("a", Behavior::Cooperative);
    supervisor.spawn("a", shared(&service)).unwrap();

    assert_or_retry(|| supervisor.unit_state("a") == Some(UnitState::Running)).await;
    assert!(service.is_running());

    let report = supervisor.cancel_all(Duration::from_secs(1)).await;
    assert!(report.is_clean());
    assert_eq!(report.terminated, vec!["a".to_string()]);

    let status = supervisor.status();
    assert_eq!(status["a"].state, UnitState::Terminated);
    assert_eq!(status["a"].error, None);
}

#[tokio::test]
async fn duplicate_live_unit_is_rejected() {
    let supervisor = Supervisor::new("test");
    supervisor
        .spawn("a", shared(&TestService::new("a", Behavior::Cooperative)))
        .unwrap();

    let err = supervisor
        .spawn("a", shared(&TestService::new("a", Behavior::Cooperative)))
        .unwrap_err();
    assert_eq!(
        err,
        SupervisorError::DuplicateUnit {
            name: "a".to_string()
        }
    );

    // Once terminated, the name can be reused.
    supervisor.cancel_all(Duration::from_secs(1)).await;
    supervisor
        .spawn("a", shared(&TestService::new("a", Behavior::Cooperative)))
        .unwrap();
    supervisor.cancel_all(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unit_ignoring_cancellation_is_aborted_within_timeout() {
    let supervisor = Supervisor::new("test");
    supervisor
        .spawn("stuck", shared(&TestService::new("stuck", Behavior::IgnoresCancel)))
        .unwrap();
    supervisor
        .spawn("good", shared(&TestService::new("good", Behavior::Cooperative)))
        .unwrap();
    assert_or_retry(|| supervisor.unit_state("stuck") == Some(UnitState::Running)).await;

    let clock = Instant::now();
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.cancel_all(Duration::from_millis(100)),
    )
    .await
    .expect("timed out");
    assert!(clock.elapsed() < Duration::from_secs(2));

    assert!(!report.is_clean());
    assert_eq!(report.timed_out, vec!["stuck".to_string()]);
    assert_eq!(report.terminated, vec!["good".to_string()]);

    let status = supervisor.status();
    assert_eq!(status["stuck"].state, UnitState::Errored);
    assert_eq!(
        status["stuck"].error,
        Some(UnitError::ShutdownTimeout {
            timeout: Duration::from_millis(100)
        })
    );
}

#[tokio::test]
async fn failing_start_marks_unit_errored() {
    let supervisor = Supervisor::new("test");
    let service = TestService::new(
        "sensors",
        Behavior::FailsOnStart("config missing".to_string()),
    );
    supervisor.spawn("sensors", shared(&service)).unwrap();

    assert_or_retry(|| supervisor.unit_state("sensors") == Some(UnitState::Errored)).await;
    assert!(!service.is_running());
    assert_eq!(
        supervisor.status()["sensors"].error,
        Some(UnitError::Failed(ServiceError::Precondition(
            "config missing".to_string()
        )))
    );

    let report = supervisor.cancel_all(Duration::from_secs(1)).await;
    assert_eq!(report.errored, vec!["sensors".to_string()]);
}

#[tokio::test]
async fn unit_exiting_on_its_own_is_errored() {
    let supervisor = Supervisor::new("test");
    supervisor
        .spawn("a", shared(&TestService::new("a", Behavior::ExitsEarly)))
        .unwrap();

    assert_or_retry(|| supervisor.unit_state("a") == Some(UnitState::Errored)).await;
    assert_eq!(supervisor.status()["a"].error, Some(UnitError::Exited));
}

#[tokio::test]
async fn unit_cancelling_its_own_token_is_not_terminated() {
    let supervisor = Supervisor::new("test");
    supervisor
        .spawn("a", shared(&TestService::new("a", Behavior::CancelsOwnToken)))
        .unwrap();

    assert_or_retry(|| supervisor.unit_state("a") == Some(UnitState::Errored)).await;
    assert_eq!(supervisor.status()["a"].error, Some(UnitError::Exited));

    let report = supervisor.cancel_all(Duration::from_secs(1)).await;
    assert_eq!(report.errored, vec!["a".to_string()]);
    assert!(report.terminated.is_empty());
}

#[tokio::test]
async fn panicking_unit_is_recorded() {
    let supervisor = Supervisor::new("test");
    supervisor
        .spawn("a", shared(&TestService::new("a", Behavior::Panics)))
        .unwrap();

    assert_or_retry(|| supervisor.unit_state("a") == Some(UnitState::Errored)).await;
    assert_eq!(
        supervisor.status()["a"].error,
        Some(UnitError::Panicked("boom".to_string()))
    );
}

#[tokio::test]
async fn cancel_all_without_units_is_clean() {
    let supervisor = Supervisor::new("test");
    let report = supervisor.cancel_all(Duration::from_millis(10)).await;
    assert!(report.is_clean());
    assert!(report.terminated.is_empty());
    assert!(supervisor.status().is_empty());
}

// ---------------------------------------------------------------------------
// Section 2: Orchestrator lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sensors_and_processor_healthy_then_degraded_after_shutdown() {
    let sensors = TestService::new("sensors", Behavior::Cooperative);
    let processor = TestService::new("processor", Behavior::Cooperative);
    let orchestrator = test_orchestrator(&[sensors.clone(), processor.clone()]);

    orchestrator.startup().await.unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Running);
    assert_or_retry(|| orchestrator.health().is_healthy()).await;

    let health = orchestrator.health();
    assert_eq!(health.overall, OverallStatus::Healthy);
    assert_eq!(health.service_running("sensors"), Some(true));
    assert_eq!(health.service_running("processor"), Some(true));
    assert_eq!(health.environment, "test");
    assert_eq!(health.version, "1.0.0");

    let report = orchestrator.shutdown().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);

    let health = orchestrator.health();
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.service_running("sensors"), Some(false));
    assert_eq!(health.service_running("processor"), Some(false));
    assert_eq!(sensors.stop_calls(), 1);
    assert_eq!(processor.stop_calls(), 1);
}

#[tokio::test]
async fn health_tracks_every_service_running() {
    let a = TestService::new("a", Behavior::Cooperative);
    let b = TestService::new("b", Behavior::ExitsEarly);
    let orchestrator = test_orchestrator(&[a.clone(), b.clone()]);

    orchestrator.startup().await.unwrap();
    assert_or_retry(|| orchestrator.supervisor().unit_state("b") == Some(UnitState::Errored))
        .await;
    assert_or_retry(|| a.is_running()).await;

    let health = orchestrator.health();
    assert!(!b.is_running());
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.units["b"].error, Some(UnitError::Exited));

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn construction_failure_surfaces_startup_error() {
    let orchestrator = Orchestrator::builder("test")
        .with_service("sensors", || {
            Err(ServiceError::Precondition("config missing".to_string()))
        })
        .build();

    let err = orchestrator.startup().await.unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::Startup {
            unit: "sensors".to_string(),
            cause: "config missing".to_string(),
        }
    );
    assert_ne!(orchestrator.state(), OrchestratorState::Running);
    assert_eq!(orchestrator.state(), OrchestratorState::Failed);
}

#[tokio::test]
async fn partial_startup_rolls_back_started_services_once() {
    let first = TestService::new("first", Behavior::Cooperative);
    let second = TestService::new("second", Behavior::Cooperative);
    let first_dyn = shared(&first);
    let second_dyn = shared(&second);

    let orchestrator = Orchestrator::builder("test")
        .with_shutdown_timeout(Duration::from_millis(200))
        .with_service("first", move || Ok(first_dyn))
        .with_service("second", move || Ok(second_dyn))
        .with_service("third", || {
            Err(ServiceError::Precondition("boom".to_string()))
        })
        .build();

    let err = orchestrator.startup().await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Startup { ref unit, .. } if unit == "third"
    ));
    assert_eq!(first.stop_calls(), 1);
    assert_eq!(second.stop_calls(), 1);

    let status = orchestrator.supervisor().status();
    assert!(status.values().all(|unit| unit.state.is_terminal()));
}

#[tokio::test]
async fn duplicate_unit_name_rolls_back_startup() {
    let first = TestService::new("dup", Behavior::Cooperative);
    let second = TestService::new("dup", Behavior::Cooperative);
    let first_dyn = shared(&first);
    let second_dyn = shared(&second);

    let orchestrator = Orchestrator::builder("test")
        .with_service("first", move || Ok(first_dyn))
        .with_service("second", move || Ok(second_dyn))
        .build();

    let err = orchestrator.startup().await.unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::Startup {
            unit: "second".to_string(),
            cause: "unit 'dup' is already running".to_string(),
        }
    );
    assert_eq!(first.stop_calls(), 1);
    assert_eq!(second.stop_calls(), 0);
}

#[tokio::test]
async fn shutdown_before_startup_is_rejected() {
    let orchestrator = test_orchestrator(&[TestService::new("a", Behavior::Cooperative)]);

    let err = orchestrator.shutdown().await.unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::InvalidLifecycleTransition {
            operation: "shutdown",
            state: OrchestratorState::Uninitialized,
        }
    );
    assert_eq!(orchestrator.state(), OrchestratorState::Uninitialized);
}

#[tokio::test]
async fn lifecycle_calls_out_of_order_are_rejected() {
    let orchestrator = test_orchestrator(&[TestService::new("a", Behavior::Cooperative)]);
    orchestrator.startup().await.unwrap();

    assert!(matches!(
        orchestrator.startup().await,
        Err(OrchestratorError::InvalidLifecycleTransition {
            operation: "startup",
            state: OrchestratorState::Running,
        })
    ));

    orchestrator.shutdown().await.unwrap();
    assert!(matches!(
        orchestrator.shutdown().await,
        Err(OrchestratorError::InvalidLifecycleTransition {
            operation: "shutdown",
            state: OrchestratorState::Stopped,
        })
    ));
    assert!(matches!(
        orchestrator.startup().await,
        Err(OrchestratorError::InvalidLifecycleTransition {
            operation: "startup",
            state: OrchestratorState::Stopped,
        })
    ));
}

#[tokio::test]
async fn failed_orchestrator_cannot_be_restarted() {
    let orchestrator = Orchestrator::builder("test")
        .with_service("a", || Err(ServiceError::Precondition("nope".to_string())))
        .build();
    orchestrator.startup().await.unwrap_err();

    assert!(matches!(
        orchestrator.startup().await,
        Err(OrchestratorError::InvalidLifecycleTransition {
            operation: "startup",
            state: OrchestratorState::Failed,
        })
    ));
}

#[tokio::test]
async fn shutdown_is_bounded_when_services_misbehave() {
    let stuck = TestService::new("stuck", Behavior::IgnoresCancel);
    let hangs = TestService::new("hangs", Behavior::HangsOnStop);
    let orchestrator = test_orchestrator(&[stuck.clone(), hangs.clone()]);

    orchestrator.startup().await.unwrap();
    assert_or_retry(|| stuck.is_running() && hangs.is_running()).await;

    let clock = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown())
        .await
        .expect("timed out")
        .unwrap();

    // 200ms graceful window + 200ms stop window, plus scheduling slack.
    assert!(clock.elapsed() < Duration::from_secs(2));
    assert_eq!(report.timed_out, vec!["stuck".to_string()]);
    assert_eq!(report.terminated, vec!["hangs".to_string()]);
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert_eq!(stuck.stop_calls(), 1);
    assert_eq!(hangs.stop_calls(), 1);

    // stop() never returned for "hangs", yet a stopped orchestrator reports nothing running.
    assert!(hangs.is_running());
    let health = orchestrator.health();
    assert_eq!(health.state, OrchestratorState::Stopped);
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.service_running("stuck"), Some(false));
    assert_eq!(health.service_running("hangs"), Some(false));
}

#[tokio::test]
async fn start_failure_after_spawn_degrades_health_without_failing_startup() {
    let sensors = TestService::new(
        "sensors",
        Behavior::FailsOnStart("device unavailable".to_string()),
    );
    let processor = TestService::new("processor", Behavior::Cooperative);
    let orchestrator = test_orchestrator(&[sensors.clone(), processor.clone()]);

    orchestrator.startup().await.unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Running);
    assert_or_retry(|| {
        orchestrator.supervisor().unit_state("sensors") == Some(UnitState::Errored)
            && processor.is_running()
    })
    .await;

    let health = orchestrator.health();
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.service_running("sensors"), Some(false));
    assert_eq!(health.service_running("processor"), Some(true));
    assert_eq!(
        health.units["sensors"].error,
        Some(UnitError::Failed(ServiceError::Precondition(
            "device unavailable".to_string()
        )))
    );

    let report = orchestrator.shutdown().await.unwrap();
    assert_eq!(report.errored, vec!["sensors".to_string()]);
    assert_eq!(report.terminated, vec!["processor".to_string()]);
    assert_eq!(sensors.stop_calls(), 1);
    assert_eq!(processor.stop_calls(), 1);
}

#[tokio::test]
async fn health_before_startup_reports_nothing_running() {
    let orchestrator = test_orchestrator(&[
        TestService::new("sensors", Behavior::Cooperative),
        TestService::new("processor", Behavior::Cooperative),
    ]);

    let health = orchestrator.health();
    assert_eq!(health.state, OrchestratorState::Uninitialized);
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.services.len(), 2);
    assert!(health.services.iter().all(|service| !service.running));
    assert!(health.units.is_empty());
}

#[tokio::test]
async fn health_is_readable_while_shutting_down() {
    let slow = TestService::new("slow", Behavior::SlowToCancel(Duration::from_millis(300)));
    let orchestrator = Arc::new(
        Orchestrator::builder("test")
            .with_shutdown_timeout(Duration::from_secs(2))
            .with_service("slow", {
                let slow = shared(&slow);
                move || Ok(slow)
            })
            .build(),
    );
    orchestrator.startup().await.unwrap();
    assert_or_retry(|| orchestrator.health().is_healthy()).await;

    let shutdown = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.shutdown().await }
    });

    assert_or_retry(|| orchestrator.state() == OrchestratorState::Stopping).await;
    let clock = Instant::now();
    let health = orchestrator.health();
    assert!(clock.elapsed() < Duration::from_millis(100));
    assert_eq!(health.state, OrchestratorState::Stopping);
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.units["slow"].state, UnitState::Cancelling);

    let report = shutdown.await.unwrap().unwrap();
    assert!(report.is_clean());
}
