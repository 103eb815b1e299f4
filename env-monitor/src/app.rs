use std::sync::Arc;

use lifecycle::{Orchestrator, Service};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::processor::{DataProcessor, SensorStore};
use crate::sensors::SensorSimulator;

pub const APP_NAME: &str = "env-monitor";

/// The orchestrator with both services declared, plus the store the API reads from.
/// Nothing runs until `orchestrator.startup()` is called.
pub struct App {
    pub orchestrator: Arc<Orchestrator>,
    pub store: SensorStore,
}

impl App {
    pub fn build(config: &Config) -> Self {
        // tokio rejects zero-capacity channels
        let (tx, rx) = mpsc::channel(config.processor.buffer_size.max(1));
        let store = SensorStore::new();

        let sensor_config = config.sensors.clone();
        let processor_store = store.clone();
        let window_size = config.processor.window_size;

        let orchestrator = Orchestrator::builder(APP_NAME)
            .with_environment(config.environment.clone())
            .with_version(config.api.version.clone())
            .with_shutdown_timeout(config.shutdown_timeout())
            .with_stop_timeout(config.stop_timeout())
            .with_service(SensorSimulator::NAME, move || {
                let simulator: Arc<dyn Service> =
                    Arc::new(SensorSimulator::new(&sensor_config, tx)?);
                Ok(simulator)
            })
            .with_service(DataProcessor::NAME, move || {
                let processor: Arc<dyn Service> =
                    Arc::new(DataProcessor::new(rx, processor_store, window_size)?);
                Ok(processor)
            })
            .build();

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
        }
    }
}
