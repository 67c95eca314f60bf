//! HTTP handlers for the status API.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use status_aggregator::{Incident, ManualStatusChangeEntry, ServiceStatus};

use crate::state::AppState;

pub async fn health() -> &'static str {
  "ok"
}

/// Latest export; 503 until the first pass has completed.
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<ServiceStatus>, StatusCode> {
  state
    .latest()
    .await
    .map(Json)
    .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Records an incident snapshot; picked up by the next pass.
pub async fn ingest_incident(
  State(state): State<Arc<AppState>>,
  Json(incident): Json<Incident>,
) -> StatusCode {
  let id = incident.id.clone();
  match state.incidents.record(incident) {
    Ok(()) => {
      tracing::debug!(incident = %id, "recorded incident");
      StatusCode::ACCEPTED
    }
    Err(e) => {
      tracing::error!(incident = %id, error = %e, "failed to record incident");
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

/// Records a manual status change; applied by the next pass.
pub async fn manual_change(
  State(state): State<Arc<AppState>>,
  Json(entry): Json<ManualStatusChangeEntry>,
) -> StatusCode {
  match state.manual_changes.record(entry) {
    Ok(()) => StatusCode::ACCEPTED,
    Err(e) => {
      tracing::error!(error = %e, "failed to record manual change");
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}
