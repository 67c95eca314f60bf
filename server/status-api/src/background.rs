//! Periodic aggregation passes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use crate::state::AppState;

/// Runs a pass immediately and then every `interval_seconds`, forever.
///
/// A failed pass is logged and retried on the next tick.
pub async fn start_pass_task(state: Arc<AppState>, interval_seconds: u64) {
  let interval = Duration::from_secs(interval_seconds.max(1));
  tracing::info!(interval_seconds, "starting aggregation pass task");

  loop {
    let cursor = Utc::now();
    match state.run_pass(cursor).await {
      Ok(summary) => tracing::debug!(?summary, "scheduled pass finished"),
      Err(e) => tracing::error!(error = %e, %cursor, "scheduled pass failed"),
    }
    sleep(interval).await;
  }
}
