use std::collections::BTreeMap;

use axum::response::{IntoResponse, Response};
use axum::Json;
use lifecycle::{HealthSnapshot, OrchestratorState, OverallStatus, UnitState};
use serde::Serialize;

/// JSON body of `GET /health`, projected from a [`HealthSnapshot`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub state: OrchestratorState,
    pub environment: String,
    pub version: String,
    pub services: BTreeMap<String, bool>,
    pub units: BTreeMap<String, UnitReport>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitReport {
    pub state: UnitState,
    pub error: Option<String>,
}

impl From<HealthSnapshot> for HealthReport {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.overall,
            state: snapshot.state,
            environment: snapshot.environment,
            version: snapshot.version,
            services: snapshot
                .services
                .into_iter()
                .map(|service| (service.name, service.running))
                .collect(),
            units: snapshot
                .units
                .into_iter()
                .map(|(name, status)| {
                    (
                        name,
                        UnitReport {
                            state: status.state,
                            error: status.error.map(|e| e.to_string()),
                        },
                    )
                })
                .collect(),
        }
    }
}

// Always 200: load balancers use /_readiness, humans read the status field.
impl IntoResponse for HealthReport {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
