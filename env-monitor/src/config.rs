use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "ENVIRONMENT", default = "development")]
    pub environment: String,

    #[envconfig(from = "DEBUG", default = "true")]
    pub debug: FlexBool,

    // Default directive for the EnvFilter, RUST_LOG still wins when set
    #[envconfig(from = "LOG_LEVEL", default = "INFO")]
    pub log_level: LevelFilter,

    #[envconfig(from = "LOG_FORMAT", default = "json")]
    pub log_format: LogFormat,

    #[envconfig(from = "LOG_DIR")]
    pub log_dir: Option<String>,

    #[envconfig(from = "LOG_RETENTION_DAYS", default = "30")]
    pub log_retention_days: usize,

    #[envconfig(from = "SHUTDOWN_TIMEOUT_MS", default = "5000")]
    pub shutdown_timeout_ms: u64,

    #[envconfig(from = "STOP_TIMEOUT_MS", default = "2000")]
    pub stop_timeout_ms: u64,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: FlexBool,

    #[envconfig(nested = true)]
    pub api: ApiConfig,

    #[envconfig(nested = true)]
    pub sensors: SensorConfig,

    #[envconfig(nested = true)]
    pub processor: ProcessorConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ApiConfig {
    #[envconfig(from = "API__TITLE", default = "Environmental Monitor API")]
    pub title: String,

    #[envconfig(from = "API__VERSION", default = "1.0.0")]
    pub version: String,

    #[envconfig(from = "API__HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "API__PORT", default = "8000")]
    pub port: u16,

    #[envconfig(from = "API__CORS_ORIGINS", default = "http://localhost:3000")]
    pub cors_origins: OriginList,
}

#[derive(Envconfig, Clone, Debug, PartialEq)]
pub struct SensorConfig {
    #[envconfig(from = "SENSORS__SAMPLING_INTERVAL", default = "30")]
    pub sampling_interval: u64, // seconds between two emissions

    #[envconfig(from = "SENSORS__NUM_SENSORS", default = "5")]
    pub num_sensors: usize,

    #[envconfig(from = "SENSORS__FAILURE_RATE", default = "0.01")]
    pub failure_rate: f64, // probability that a sensor skips a tick

    #[envconfig(from = "SENSORS__NOISE_LEVEL", default = "0.1")]
    pub noise_level: f64,
}

#[derive(Envconfig, Clone, Debug, PartialEq)]
pub struct ProcessorConfig {
    #[envconfig(from = "PROCESSOR__BUFFER_SIZE", default = "1024")]
    pub buffer_size: usize, // capacity of the sensors -> processor channel

    #[envconfig(from = "PROCESSOR__WINDOW_SIZE", default = "100")]
    pub window_size: usize,
}

impl Config {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl ApiConfig {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SensorConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid log format '{0}', expected json or text")]
pub struct ParseLogFormatError(String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "console" => Ok(LogFormat::Text),
            _ => Err(ParseLogFormatError(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Comma-separated list of allowed CORS origins, blanks dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OriginList(pub Vec<String>);

impl FromStr for OriginList {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OriginList(
            s.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }
}

impl Deref for OriginList {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
