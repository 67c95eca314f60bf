//! Status API
//!
//! HTTP front for the status aggregator: serves the latest export and
//! records incidents and manual changes for the next pass.

mod background;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;

pub use background::start_pass_task;
pub use handlers::{health, ingest_incident, manual_change, status};
pub use state::AppState;

/// Builds the router over shared state.
pub fn app(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/status", get(status))
    .route("/incidents", post(ingest_incident))
    .route("/manual", post(manual_change))
    .layer(CorsLayer::permissive())
    .with_state(state)
}
