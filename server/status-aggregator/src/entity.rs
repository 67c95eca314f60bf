//! Persisted entity model: events, incident groups, incidents, messages, cursors.
//!
//! Every component-affecting row shares [`AffectedFields`]. An entity is
//! active exactly while its `end_time` is unset; the update path only ever
//! closes entities, never reopens them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::incident::ParsedIncident;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Ordinal component health. Ordering is severity: `Up < Degraded < Down`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentStatus {
  #[default]
  Up,
  Degraded,
  Down,
}

impl ComponentStatus {
  /// Lowercase word used in narrative messages ("is degraded").
  pub fn as_phrase(self) -> &'static str {
    match self {
      Self::Up => "up",
      Self::Degraded => "degraded",
      Self::Down => "down",
    }
  }
}

// ---------------------------------------------------------------------------
// Entity traits
// ---------------------------------------------------------------------------

/// A row in the entity store, addressed by partition and row key.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Partition every row of this kind lives under.
  const PARTITION: &'static str;

  fn row_key(&self) -> &str;
}

/// An entity that applies a status to a path in the component tree.
pub trait ComponentAffecting: Entity {
  fn fields(&self) -> &AffectedFields;
  fn fields_mut(&mut self) -> &mut AffectedFields;

  fn affected_path(&self) -> &str {
    &self.fields().affected_component_path
  }

  fn status(&self) -> ComponentStatus {
    self.fields().affected_component_status
  }

  fn start_time(&self) -> DateTime<Utc> {
    self.fields().start_time
  }

  fn end_time(&self) -> Option<DateTime<Utc>> {
    self.fields().end_time
  }

  fn is_active(&self) -> bool {
    self.fields().end_time.is_none()
  }
}

/// An entity linked to a parent aggregation.
pub trait Aggregated: ComponentAffecting {
  type Parent: ComponentAffecting;

  fn parent_row_key(&self) -> &str;

  /// Builds a new child linked to `parent` for a parsed incident.
  fn link(parent: &Self::Parent, input: &ParsedIncident, path: String) -> Self;
}

/// An entity that aggregates children of another kind.
pub trait Aggregation: ComponentAffecting {
  type Child: Aggregated<Parent = Self>;
}

// ---------------------------------------------------------------------------
// Shared fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedFields {
  pub row_key: String,
  pub affected_component_path: String,
  pub affected_component_status: ComponentStatus,
  pub start_time: DateTime<Utc>,
  #[serde(default)]
  pub end_time: Option<DateTime<Utc>>,
}

impl AffectedFields {
  pub fn new(
    row_key: String,
    path: impl Into<String>,
    status: ComponentStatus,
    start_time: DateTime<Utc>,
  ) -> Self {
    Self {
      row_key,
      affected_component_path: path.into(),
      affected_component_status: status,
      start_time,
      end_time: None,
    }
  }

  /// Ends the entity. The end is clamped so it never precedes the start.
  pub fn close(&mut self, end: DateTime<Utc>) {
    self.end_time = Some(end.max(self.start_time));
  }

  /// Raises the status to `status` if more severe. Returns whether it changed.
  pub fn raise_status(&mut self, status: ComponentStatus) -> bool {
    if status > self.affected_component_status {
      self.affected_component_status = status;
      true
    } else {
      false
    }
  }
}

// ---------------------------------------------------------------------------
// Row keys
// ---------------------------------------------------------------------------

/// Stable row key: `prefix-<16 hex>` over the identifying parts.
///
/// Re-running a pass recomputes the same keys, so writes upsert instead of
/// duplicating rows.
pub fn stable_row_key(prefix: &str, parts: &[&str]) -> String {
  let mut hasher = blake3::Hasher::new();
  for (i, part) in parts.iter().enumerate() {
    if i > 0 {
      hasher.update(b"|");
    }
    hasher.update(part.as_bytes());
  }
  let hex = hasher.finalize().to_hex();
  format!("{}-{}", prefix, &hex[..16])
}

fn timestamp_key(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339()
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Top-level aggregation. Its path is a truncated prefix of its incidents' paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntity {
  #[serde(flatten)]
  pub fields: AffectedFields,
}

impl EventEntity {
  /// Event created for a parsed incident; `seed` identifies what caused it.
  pub fn new(path: &str, status: ComponentStatus, start_time: DateTime<Utc>, seed: &str) -> Self {
    let row_key = stable_row_key("evt", &[path, &timestamp_key(&start_time), seed]);
    Self {
      fields: AffectedFields::new(row_key, path, status, start_time),
    }
  }
}

impl Entity for EventEntity {
  const PARTITION: &'static str = "events";

  fn row_key(&self) -> &str {
    &self.fields.row_key
  }
}

impl ComponentAffecting for EventEntity {
  fn fields(&self) -> &AffectedFields {
    &self.fields
  }

  fn fields_mut(&mut self) -> &mut AffectedFields {
    &mut self.fields
  }
}

impl Aggregation for EventEntity {
  type Child = IncidentGroupEntity;
}

// ---------------------------------------------------------------------------
// Incident group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentGroupEntity {
  #[serde(flatten)]
  pub fields: AffectedFields,
  pub parent_row_key: String,
}

impl Entity for IncidentGroupEntity {
  const PARTITION: &'static str = "groups";

  fn row_key(&self) -> &str {
    &self.fields.row_key
  }
}

impl ComponentAffecting for IncidentGroupEntity {
  fn fields(&self) -> &AffectedFields {
    &self.fields
  }

  fn fields_mut(&mut self) -> &mut AffectedFields {
    &mut self.fields
  }
}

impl Aggregated for IncidentGroupEntity {
  type Parent = EventEntity;

  fn parent_row_key(&self) -> &str {
    &self.parent_row_key
  }

  fn link(parent: &EventEntity, input: &ParsedIncident, path: String) -> Self {
    let row_key = stable_row_key(
      "grp",
      &[&path, &timestamp_key(&input.start_time), &input.id],
    );
    Self {
      fields: AffectedFields::new(row_key, path, input.affected_component_status, input.start_time),
      parent_row_key: parent.fields.row_key.clone(),
    }
  }
}

impl Aggregation for IncidentGroupEntity {
  type Child = IncidentEntity;
}

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

/// Leaf entity mirroring one incident in the external incident API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentEntity {
  #[serde(flatten)]
  pub fields: AffectedFields,
  pub parent_row_key: String,
  /// Identifier used to re-query mitigation state upstream.
  pub incident_api_id: String,
}

impl IncidentEntity {
  pub fn row_key_for(incident_api_id: &str, path: &str) -> String {
    stable_row_key("inc", &[incident_api_id, path])
  }
}

impl Entity for IncidentEntity {
  const PARTITION: &'static str = "incidents";

  fn row_key(&self) -> &str {
    &self.fields.row_key
  }
}

impl ComponentAffecting for IncidentEntity {
  fn fields(&self) -> &AffectedFields {
    &self.fields
  }

  fn fields_mut(&mut self) -> &mut AffectedFields {
    &mut self.fields
  }
}

impl Aggregated for IncidentEntity {
  type Parent = IncidentGroupEntity;

  fn parent_row_key(&self) -> &str {
    &self.parent_row_key
  }

  fn link(parent: &IncidentGroupEntity, input: &ParsedIncident, path: String) -> Self {
    let row_key = Self::row_key_for(&input.id, &path);
    let mut fields =
      AffectedFields::new(row_key, path, input.affected_component_status, input.start_time);
    if let Some(end) = input.end_time {
      fields.close(end);
    }
    Self {
      fields,
      parent_row_key: parent.fields.row_key.clone(),
      incident_api_id: input.id.clone(),
    }
  }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
  Start,
  End,
  Manual,
}

impl MessageType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Start => "start",
      Self::End => "end",
      Self::Manual => "manual",
    }
  }
}

/// One entry in an event's narrative log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
  pub row_key: String,
  pub event_row_key: String,
  pub time: DateTime<Utc>,
  pub contents: String,
  pub message_type: MessageType,
}

impl MessageEntity {
  pub fn new(
    event: &EventEntity,
    time: DateTime<Utc>,
    contents: impl Into<String>,
    message_type: MessageType,
  ) -> Self {
    let contents = contents.into();
    Self {
      row_key: Self::row_key_for(&event.fields.row_key, message_type, &time, &contents),
      event_row_key: event.fields.row_key.clone(),
      time,
      contents,
      message_type,
    }
  }

  /// Start and End are unique per event and time. Manual messages also key
  /// on their contents, so two posted in the same instant both survive.
  pub fn row_key_for(
    event_row_key: &str,
    message_type: MessageType,
    time: &DateTime<Utc>,
    contents: &str,
  ) -> String {
    let time = timestamp_key(time);
    match message_type {
      MessageType::Manual => stable_row_key("msg", &[event_row_key, message_type.as_str(), &time, contents]),
      _ => stable_row_key("msg", &[event_row_key, message_type.as_str(), &time]),
    }
  }
}

impl Entity for MessageEntity {
  const PARTITION: &'static str = "messages";

  fn row_key(&self) -> &str {
    &self.row_key
  }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Named high-water mark persisted between passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntity {
  pub name: String,
  pub value: DateTime<Utc>,
}

impl Entity for CursorEntity {
  const PARTITION: &'static str = "cursors";

  fn row_key(&self) -> &str {
    &self.name
  }
}
