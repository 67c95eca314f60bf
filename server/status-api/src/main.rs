//! Binary entrypoint for the status API.
//!
//! Config path comes from the first argument, then `STATUS_CONFIG_PATH`,
//! then `status.toml`. A missing file means defaults.

use std::net::SocketAddr;
use std::sync::Arc;

use status_aggregator::{load_config, logging};
use status_api::{app, start_pass_task, AppState};

fn resolve_config_path() -> String {
  std::env::args()
    .nth(1)
    .filter(|v| !v.trim().is_empty())
    .or_else(|| std::env::var("STATUS_CONFIG_PATH").ok().filter(|v| !v.trim().is_empty()))
    .unwrap_or_else(|| "status.toml".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let config_path = resolve_config_path();
  let config = load_config(Some(config_path.as_str()))?;
  logging::init(&config.logging);
  tracing::info!(path = %config_path, "loaded configuration");

  let state = Arc::new(AppState::new(&config)?);
  tokio::spawn(start_pass_task(state.clone(), config.server.pass_interval_seconds));

  let addr = SocketAddr::new(config.server.host, config.server.port);
  let listener = tokio::net::TcpListener::bind(addr).await?;
  tracing::info!(%addr, "status-api listening");

  axum::serve(listener, app(state))
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  tracing::info!("status-api shut down");
  Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
        tracing::error!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
    () = terminate => tracing::info!("received SIGTERM, shutting down"),
  }
}
