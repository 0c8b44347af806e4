use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use salonbook::clock::SystemClock;
use salonbook::config::{SchedulingConfig, ServerConfig};
use salonbook::engine::Engine;
use salonbook::http::{build_router, AppState};
use salonbook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = ServerConfig::from_env()?;
    let scheduling = SchedulingConfig::from_env()?;
    salonbook::observability::init(server.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&server.data_dir)?;
    let wal_path = server.data_dir.join("appointments.wal");
    let engine = Arc::new(Engine::new(wal_path, scheduling.clone(), Arc::new(SystemClock))?);

    tokio::spawn(sweeper::run_sweeper(engine.clone(), server.sweep_interval));
    tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        server.compact_threshold,
        Duration::from_secs(30),
    ));

    let app = build_router(AppState {
        engine,
        sweep_on_read: server.sweep_on_read,
    });

    let addr = format!("{}:{}", server.bind, server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("salonbook listening on {addr}");
    info!("  data_dir: {}", server.data_dir.display());
    info!(
        "  hours: {}-{} every {} min, closed {:?}, horizon {:?}",
        scheduling.open.format("%H:%M"),
        scheduling.close.format("%H:%M"),
        scheduling.slot_minutes,
        scheduling.closed_weekdays,
        scheduling.horizon
    );
    info!("  sweep every {:?}, on read: {}", server.sweep_interval, server.sweep_on_read);
    info!(
        "  metrics: {}",
        server
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("salonbook stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c; in-flight requests are drained by axum.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
