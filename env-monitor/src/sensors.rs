//! Simulated sensor fleet: emits one reading per sensor on every sampling tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use lifecycle::{CancellationToken, Service, ServiceError};
use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::SensorConfig;
use crate::prometheus::{report_emitted_reading, report_failed_reading};
use crate::reading::{Reading, SensorKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatedSensor {
    pub id: String,
    pub kind: SensorKind,
}

pub struct SensorSimulator {
    config: SensorConfig,
    sensors: Vec<SimulatedSensor>,
    output: mpsc::Sender<Reading>,
    running: AtomicBool,
    // Emission is only allowed while this is true; stop() flips it under the write lock.
    gate: RwLock<bool>,
    stopped: CancellationToken,
}

impl SensorSimulator {
    pub const NAME: &'static str = "sensors";

    pub fn new(config: &SensorConfig, output: mpsc::Sender<Reading>) -> Result<Self, ServiceError> {
        if config.num_sensors == 0 {
            return Err(ServiceError::Precondition(
                "at least one sensor must be configured".to_string(),
            ));
        }
        if config.sampling_interval == 0 {
            return Err(ServiceError::Precondition(
                "sampling interval must be at least one second".to_string(),
            ));
        }
        for (field, rate) in [
            ("failure_rate", config.failure_rate),
            ("noise_level", config.noise_level),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ServiceError::Precondition(format!(
                    "{field} must be within [0, 1], got {rate}"
                )));
            }
        }

        let sensors = (0..config.num_sensors)
            .map(|i| SimulatedSensor {
                id: format!("sensor_{:03}", i + 1),
                kind: SensorKind::ALL[i % SensorKind::ALL.len()],
            })
            .collect();

        Ok(Self {
            config: config.clone(),
            sensors,
            output,
            running: AtomicBool::new(false),
            gate: RwLock::new(false),
            stopped: CancellationToken::new(),
        })
    }

    pub fn sensors(&self) -> &[SimulatedSensor] {
        &self.sensors
    }

    /// Emit one batch. Holds the gate's read lock for the whole batch, so a
    /// concurrent `stop()` waits for it and nothing is sent once `stop()` returns.
    fn tick(&self) -> usize {
        let open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return 0;
        }

        let mut rng = rand::thread_rng();
        let mut emitted = 0;
        for sensor in &self.sensors {
            if rng.gen_bool(self.config.failure_rate) {
                debug!(sensor = %sensor.id, "sensor failed to produce a reading");
                report_failed_reading(sensor.kind, "sensor_failure");
                continue;
            }

            let reading = Reading::sample(&sensor.id, sensor.kind, self.config.noise_level, &mut rng);
            match self.output.try_send(reading) {
                Ok(()) => {
                    report_emitted_reading(sensor.kind);
                    emitted += 1;
                }
                Err(TrySendError::Full(_)) => {
                    warn!(sensor = %sensor.id, "reading dropped, processor is falling behind");
                    report_failed_reading(sensor.kind, "channel_full");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(sensor = %sensor.id, "reading dropped, processor is gone");
                    report_failed_reading(sensor.kind, "channel_closed");
                }
            }
        }
        emitted
    }
}

#[async_trait]
impl Service for SensorSimulator {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        {
            let mut open = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            if self.stopped.is_cancelled() {
                return Err(ServiceError::Precondition(
                    "sensor simulator cannot be restarted after stop".to_string(),
                ));
            }
            *open = true;
        }
        self.running.store(true, Ordering::Release);
        info!(
            sensors = self.sensors.len(),
            interval_secs = self.config.sampling_interval,
            "sensor simulator started"
        );

        let mut interval = tokio::time::interval(self.config.sampling_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.stopped.cancelled() => break,
                _ = interval.tick() => {
                    let emitted = self.tick();
                    debug!(emitted, "sensor batch emitted");
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!("sensor simulator stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        let mut open = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        *open = false;
        self.stopped.cancel();
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
