use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{Config, LogFormat};

/// Install the global subscriber: stdout in the configured format, plus a daily
/// rolling file under `LOG_DIR` when set. Keep the returned guard alive until exit
/// or buffered file lines are lost.
pub fn init(config: &Config) -> eyre::Result<Option<WorkerGuard>> {
    let default_level = config.log_level;
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    };

    let stdout_layer = {
        let base_layer = fmt::layer().with_target(true).with_level(true);

        match config.log_format {
            LogFormat::Json => base_layer.json().with_filter(filter()).boxed(),
            LogFormat::Text => base_layer
                .with_ansi(*config.debug)
                .with_filter(filter())
                .boxed(),
        }
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("env-monitor")
                .filename_suffix("log")
                .max_log_files(config.log_retention_days.max(1))
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
