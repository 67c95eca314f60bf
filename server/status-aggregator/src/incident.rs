//! External incident API contract and the parsed incident handed to the factory.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::ComponentStatus;

/// One incident as reported by the incident-tracking system. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
  pub id: String,
  pub title: String,
  /// 1 is the most severe.
  pub severity: u8,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub mitigated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error)]
pub enum IncidentApiError {
  /// The incident no longer exists upstream.
  #[error("incident {0} not found")]
  NotFound(String),

  #[error("request failed: {0}")]
  Request(String),
}

/// Read access to the incident-tracking system.
#[async_trait]
pub trait IncidentApi: Send + Sync {
  /// Fetches one incident by its external identifier.
  async fn get_incident(&self, id: &str) -> Result<Incident, IncidentApiError>;

  /// Lists incidents created at or after `since` (all incidents when `None`).
  async fn list_incidents(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<Incident>, IncidentApiError>;
}

/// An incident mapped onto the component tree, ready for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIncident {
  /// External incident identifier.
  pub id: String,
  pub affected_component_path: String,
  pub affected_component_status: ComponentStatus,
  pub start_time: DateTime<Utc>,
  pub end_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// In-memory incident source
// ---------------------------------------------------------------------------

/// Incident API backed by incidents recorded in memory.
///
/// Used by the binaries (incidents arrive on stdin or over HTTP) and tests.
#[derive(Debug, Default)]
pub struct RecordedIncidentApi {
  incidents: RwLock<BTreeMap<String, Incident>>,
}

impl RecordedIncidentApi {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records an incident, replacing any earlier snapshot with the same id.
  pub fn record(&self, incident: Incident) -> Result<(), IncidentApiError> {
    let mut incidents = self
      .incidents
      .write()
      .map_err(|_| IncidentApiError::Request("lock poisoned".into()))?;
    incidents.insert(incident.id.clone(), incident);
    Ok(())
  }

  /// Forgets an incident, as if it were deleted upstream.
  pub fn forget(&self, id: &str) -> Result<Option<Incident>, IncidentApiError> {
    let mut incidents = self
      .incidents
      .write()
      .map_err(|_| IncidentApiError::Request("lock poisoned".into()))?;
    Ok(incidents.remove(id))
  }
}

#[async_trait]
impl IncidentApi for RecordedIncidentApi {
  async fn get_incident(&self, id: &str) -> Result<Incident, IncidentApiError> {
    let incidents = self
      .incidents
      .read()
      .map_err(|_| IncidentApiError::Request("lock poisoned".into()))?;
    incidents
      .get(id)
      .cloned()
      .ok_or_else(|| IncidentApiError::NotFound(id.to_string()))
  }

  async fn list_incidents(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<Incident>, IncidentApiError> {
    let incidents = self
      .incidents
      .read()
      .map_err(|_| IncidentApiError::Request("lock poisoned".into()))?;
    Ok(
      incidents
        .values()
        .filter(|i| since.map_or(true, |s| i.created_at >= s))
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn incident(id: &str, minute: u32) -> Incident {
    Incident {
      id: id.into(),
      title: format!("incident {}", id),
      severity: 2,
      created_at: Utc.with_ymd_and_hms(2025, 1, 15, 10, minute, 0).unwrap(),
      mitigated_at: None,
    }
  }

  #[tokio::test]
  async fn missing_incident_is_not_found() {
    let api = RecordedIncidentApi::new();
    let err = api.get_incident("404").await.unwrap_err();
    assert!(matches!(err, IncidentApiError::NotFound(ref id) if id == "404"));
  }

  #[tokio::test]
  async fn list_filters_by_creation_time() {
    let api = RecordedIncidentApi::new();
    api.record(incident("a", 0)).unwrap();
    api.record(incident("b", 10)).unwrap();
    api.record(incident("c", 20)).unwrap();

    let since = Utc.with_ymd_and_hms(2025, 1, 15, 10, 10, 0).unwrap();
    let ids: Vec<_> = api
      .list_incidents(Some(since))
      .await
      .unwrap()
      .into_iter()
      .map(|i| i.id)
      .collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert_eq!(api.list_incidents(None).await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn record_replaces_and_forget_removes() {
    let api = RecordedIncidentApi::new();
    api.record(incident("a", 0)).unwrap();
    let mut mitigated = incident("a", 0);
    mitigated.mitigated_at = Some(Utc.with_ymd_and_hms(2025, 1, 15, 11, 0, 0).unwrap());
    api.record(mitigated.clone()).unwrap();

    assert_eq!(api.get_incident("a").await.unwrap(), mitigated);
    assert!(api.forget("a").unwrap().is_some());
    assert!(api.get_incident("a").await.is_err());
  }

  #[test]
  fn incident_deserializes_without_mitigation() {
    let json = r#"{"id":"7","title":"t","severity":1,"created_at":"2025-01-15T10:00:00Z","extra":true}"#;
    let incident: Incident = serde_json::from_str(json).unwrap();
    assert_eq!(incident.id, "7");
    assert!(incident.mitigated_at.is_none());
  }
}
