//! Consumes sensor readings and keeps rolling per-sensor statistics.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lifecycle::{CancellationToken, Service, ServiceError};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::prometheus::report_processed_reading;
use crate::reading::{Reading, SensorKind};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorSummary {
    pub sensor_id: String,
    pub kind: SensorKind,
    pub unit: &'static str,
    pub last_value: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Readings currently in the rolling window.
    pub window: usize,
    /// Readings processed since startup.
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

struct SensorWindow {
    kind: SensorKind,
    unit: &'static str,
    values: VecDeque<f64>,
    count: u64,
    last_seen: DateTime<Utc>,
}

impl SensorWindow {
    fn summary(&self, sensor_id: &str) -> Option<SensorSummary> {
        let last_value = *self.values.back()?;
        let (sum, min, max) = self.values.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), &v| (sum + v, min.min(v), max.max(v)),
        );
        Some(SensorSummary {
            sensor_id: sensor_id.to_owned(),
            kind: self.kind,
            unit: self.unit,
            last_value,
            mean: sum / self.values.len() as f64,
            min,
            max,
            window: self.values.len(),
            count: self.count,
            last_seen: self.last_seen,
        })
    }
}

/// Shared view of processed readings, cheap to clone into HTTP handlers.
#[derive(Clone, Default)]
pub struct SensorStore {
    inner: Arc<RwLock<BTreeMap<String, SensorWindow>>>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reading: Reading, window_size: usize) {
        let mut sensors = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let window = sensors
            .entry(reading.sensor_id)
            .or_insert_with(|| SensorWindow {
                kind: reading.kind,
                unit: reading.unit,
                values: VecDeque::with_capacity(window_size),
                count: 0,
                last_seen: reading.timestamp,
            });

        while window.values.len() >= window_size.max(1) {
            window.values.pop_front();
        }
        window.values.push_back(reading.value);
        window.count += 1;
        window.last_seen = reading.timestamp;
    }

    /// Latest summary per sensor, ordered by sensor id.
    pub fn summaries(&self) -> Vec<SensorSummary> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(id, window)| window.summary(id))
            .collect()
    }

    pub fn summary(&self, sensor_id: &str) -> Option<SensorSummary> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .and_then(|window| window.summary(sensor_id))
    }
}

pub struct DataProcessor {
    input: Mutex<Option<mpsc::Receiver<Reading>>>,
    store: SensorStore,
    window_size: usize,
    running: AtomicBool,
    gate: RwLock<bool>,
    stopped: CancellationToken,
}

impl DataProcessor {
    pub const NAME: &'static str = "processor";

    pub fn new(
        input: mpsc::Receiver<Reading>,
        store: SensorStore,
        window_size: usize,
    ) -> Result<Self, ServiceError> {
        if window_size == 0 {
            return Err(ServiceError::Precondition(
                "window size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            input: Mutex::new(Some(input)),
            store,
            window_size,
            running: AtomicBool::new(false),
            gate: RwLock::new(false),
            stopped: CancellationToken::new(),
        })
    }

    fn process(&self, reading: Reading) -> bool {
        let open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return false;
        }
        let kind = reading.kind;
        self.store.record(reading, self.window_size);
        report_processed_reading(kind);
        true
    }
}

#[async_trait]
impl Service for DataProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let mut input = {
            let mut open = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            if self.stopped.is_cancelled() {
                return Err(ServiceError::Precondition(
                    "data processor cannot be restarted after stop".to_string(),
                ));
            }
            let input = self
                .input
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| {
                    ServiceError::Precondition("input channel already consumed".to_string())
                })?;
            *open = true;
            input
        };
        self.running.store(true, Ordering::Release);
        info!(window_size = self.window_size, "data processor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.stopped.cancelled() => break,
                reading = input.recv() => match reading {
                    Some(reading) => {
                        if !self.process(reading) {
                            break;
                        }
                    }
                    None => {
                        debug!("input channel closed");
                        break;
                    }
                },
            }
        }

        self.running.store(false, Ordering::Release);
        info!("data processor stopped");
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
