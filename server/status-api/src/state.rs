//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use status_aggregator::{
  Config, InMemoryStore, PassSummary, RecordedIncidentApi, RecordedManualChanges, ServiceStatus,
  StatusUpdater,
};

pub struct AppState {
  pub incidents: Arc<RecordedIncidentApi>,
  pub manual_changes: Arc<RecordedManualChanges>,
  updater: StatusUpdater<InMemoryStore>,
  latest: RwLock<Option<ServiceStatus>>,
  // One pass at a time: the store assumes a single writer.
  pass: Mutex<()>,
}

impl AppState {
  pub fn new(config: &Config) -> status_aggregator::Result<Self> {
    let incidents = Arc::new(RecordedIncidentApi::new());
    let manual_changes = Arc::new(RecordedManualChanges::new());
    let updater = StatusUpdater::new(
      Arc::new(InMemoryStore::new()),
      incidents.clone(),
      manual_changes.clone(),
      config,
    )?;
    Ok(Self {
      incidents,
      manual_changes,
      updater,
      latest: RwLock::new(None),
      pass: Mutex::new(()),
    })
  }

  /// Runs one pass and publishes its export. A failed pass keeps the
  /// previous export in place.
  pub async fn run_pass(&self, cursor: DateTime<Utc>) -> status_aggregator::Result<PassSummary> {
    let _guard = self.pass.lock().await;
    let output = self.updater.run_pass(cursor).await?;
    *self.latest.write().await = Some(output.status);
    Ok(output.summary)
  }

  /// Export of the last successful pass, if any.
  pub async fn latest(&self) -> Option<ServiceStatus> {
    self.latest.read().await.clone()
  }
}
