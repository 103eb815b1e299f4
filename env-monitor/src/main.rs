use envconfig::Envconfig;
use eyre::Result;
use lifecycle::wait_for_shutdown_signal;
use tracing::{error, info};

use env_monitor::app::App;
use env_monitor::config::Config;
use env_monitor::logging;
use env_monitor::prometheus::setup_metrics_recorder;
use env_monitor::router::{router, AppState};

async fn shutdown_signal() {
    if let Err(e) = wait_for_shutdown_signal().await {
        // Without signal handlers the only way out is killing the process.
        error!("failed to install signal handlers: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env()?;
    let _log_guard = logging::init(&config)?;

    info!(
        environment = %config.environment,
        version = %config.api.version,
        "Starting {}",
        config.api.title
    );

    let metrics = if *config.export_prometheus {
        Some(setup_metrics_recorder()?)
    } else {
        None
    };

    let app = App::build(&config);
    app.orchestrator.startup().await?;

    let state = AppState {
        orchestrator: app.orchestrator.clone(),
        store: app.store.clone(),
        title: config.api.title.clone(),
    };
    let http = router(state, &config.api.cors_origins, metrics);

    let served = async {
        let listener = tokio::net::TcpListener::bind(config.api.bind()).await?;
        info!("listening on {}", config.api.bind());
        axum::serve(listener, http)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
    .await;

    // Services are stopped even when the listener failed.
    let report = app.orchestrator.shutdown().await?;
    if !report.is_clean() {
        error!(
            timed_out = ?report.timed_out,
            errored = ?report.errored,
            "services did not shut down cleanly"
        );
    }

    served?;
    Ok(())
}
