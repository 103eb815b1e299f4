//! Point-in-time health view assembled by [`Orchestrator::health`](crate::Orchestrator::health).

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::orchestrator::OrchestratorState;
use crate::unit::UnitStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Healthy => f.write_str("healthy"),
            OverallStatus::Degraded => f.write_str("degraded"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceHealth {
    pub name: String,
    pub running: bool,
}

/// Immutable, recomputed on every read; never fails to build.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    pub overall: OverallStatus,
    pub state: OrchestratorState,
    /// One entry per configured service, in declared order.
    pub services: Vec<ServiceHealth>,
    pub units: BTreeMap<String, UnitStatus>,
    pub environment: String,
    pub version: String,
}

impl HealthSnapshot {
    /// Healthy iff the orchestrator is running and every service reports running.
    pub(crate) fn new(
        state: OrchestratorState,
        services: Vec<ServiceHealth>,
        units: BTreeMap<String, UnitStatus>,
        environment: String,
        version: String,
    ) -> Self {
        let healthy =
            state == OrchestratorState::Running && services.iter().all(|service| service.running);
        Self {
            overall: if healthy {
                OverallStatus::Healthy
            } else {
                OverallStatus::Degraded
            },
            state,
            services,
            units,
            environment,
            version,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == OverallStatus::Healthy
    }

    /// Running flag of the service declared as `name`, if configured.
    pub fn service_running(&self, name: &str) -> Option<bool> {
        self.services
            .iter()
            .find(|service| service.name == name)
            .map(|service| service.running)
    }
}
