//! Daemon lifecycle: wiring, readiness check, HTTP server, graceful shutdown

use anyhow::{Context, Result};
use custody_core::config::CustodyConfig;
use custody_pipeline::Custody;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::api::{self, AppState};

pub async fn run(config: CustodyConfig) -> Result<()> {
    info!("daemon starting");

    let custody = Custody::from_config(&config)
        .await
        .context("initialising custody service")?;

    match custody.ready().await {
        Ok(()) => info!("content store: reachable"),
        Err(e) => warn!("content store: {e}  (readiness check will report 503)"),
    }

    let state = AppState::new(custody);
    let app = api::router(state, config.daemon.metrics);

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;
    info!(
        addr = %config.daemon.listen,
        metrics = config.daemon.metrics,
        "http: listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("daemon exiting cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("registering SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
    }
}
