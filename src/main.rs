use std::time::Duration;

use axum::routing::get;
use sessiond::{app, initialize_state, refresh, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // initialize tracing.
    telemetry::setup_subscriber();

    let recorder_handle = telemetry::setup_metrics_recorder()?;

    let state = initialize_state().await?;
    let address = state.config.address.clone();

    // purge expired refresh tokens in background.
    let reaper = refresh::spawn_reaper(
        state.sessions.clone(),
        Duration::from_secs(state.config.refresh.reap_interval_secs.max(1)),
    );

    let app = app(state)
        // `GET /metrics` goes to Prometheus exporter.
        .route("/metrics", get(move || std::future::ready(recorder_handle.render())));

    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "cannot listen for shutdown signal");
            }
        })
        .await?;

    reaper.abort();
    tracing::info!("server stopped");

    Ok(())
}
