//! relayd - multi-session messaging relay daemon.

use relayd::client::ClientFactory;
use relayd::client::loopback::LoopbackFactory;
use relayd::config::{ClientBackend, Config, validate};
use relayd::http::{self, AppState};
use relayd::session::{IdleReaper, SessionManager, SessionSettings};
use relayd::{metrics, telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Config file used when no path is given.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let explicit_path = std::env::args().nth(1);
    let defaulted =
        explicit_path.is_none() && !std::path::Path::new(DEFAULT_CONFIG_PATH).exists();
    let mut config = match &explicit_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(DEFAULT_CONFIG_PATH),
    }
    .map_err(|e| {
        eprintln!(
            "Failed to load config {}: {e}",
            explicit_path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)
        );
        e
    })?;
    let overrides = config.apply_env();

    // Initialize tracing
    telemetry::init_tracing(&config.logging);
    if defaulted {
        tracing::warn!(
            path = DEFAULT_CONFIG_PATH,
            "Config file not found, using built-in defaults"
        );
    }
    if !overrides.is_empty() {
        info!(keys = ?overrides, "Applied environment overrides");
    }

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    info!(
        bind = %config.server.bind,
        max_sessions = config.sessions.max_sessions,
        backend = ?config.client.backend,
        "Starting relayd"
    );

    // Prometheus metrics are optional.
    // Convention: metrics_port absent or 0 disables the HTTP endpoint.
    let shutdown = CancellationToken::new();
    match config.server.metrics_port.filter(|port| *port != 0) {
        Some(port) => {
            metrics::init();
            tokio::spawn(http::run_metrics_server(port, shutdown.clone()));
            info!(port, "Prometheus HTTP server started");
        }
        None => info!("Metrics disabled"),
    }

    let factory: Arc<dyn ClientFactory> = match config.client.backend {
        ClientBackend::Loopback => Arc::new(match config.client.auto_pair_secs {
            0 => LoopbackFactory::manual(),
            secs => LoopbackFactory::auto_pair(Duration::from_secs(secs)),
        }),
    };

    let manager = Arc::new(SessionManager::new(
        SessionSettings::from(&config.sessions),
        factory,
    ));

    let reaper = IdleReaper::new(
        Arc::clone(&manager),
        config.sessions.cleanup_interval(),
        config.sessions.idle_timeout(),
    )
    .spawn(shutdown.clone());

    let state = Arc::new(AppState::new(
        Arc::clone(&manager),
        config.messages.clone(),
        config.uploads.clone(),
    ));
    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .map_err(|e| {
            error!(bind = %config.server.bind, error = %e, "Failed to bind HTTP API");
            e
        })?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    http::serve(listener, http::router(state), shutdown.clone()).await?;

    // The server has drained; stop background work and release every client.
    shutdown.cancel();
    if let Err(e) = reaper.await {
        error!(error = %e, "Idle reaper task failed");
    }
    let destroyed = manager.shutdown().await;
    info!(destroyed, "relayd stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
