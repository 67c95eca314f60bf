//! Public JSON contract consumed by status pages.
//!
//! Field names are camelCase; null and empty fields are omitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::segment::TimelineSegment;
use crate::component::Component;
use crate::entity::{ComponentStatus, MessageEntity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
  /// Cursor of the pass that produced this export.
  pub last_built: DateTime<Utc>,
  /// Time of the newest exported message.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<DateTime<Utc>>,
  pub service_status: PublicComponent,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub events: Vec<PublicEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicComponent {
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  pub status: ComponentStatus,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sub_components: Vec<PublicComponent>,
}

impl From<&Component> for PublicComponent {
  /// Projects a component using its rolled-up status.
  fn from(component: &Component) -> Self {
    Self {
      name: component.name.clone(),
      description: component.description.clone(),
      status: component.effective_status(),
      sub_components: component.subcomponents.iter().map(PublicComponent::from).collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEvent {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  pub start_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub messages: Vec<PublicMessage>,
}

impl PublicEvent {
  pub fn from_segment(path: &str, segment: TimelineSegment) -> Self {
    Self {
      path: (!path.is_empty()).then(|| path.to_string()),
      start_time: segment.start_time,
      end_time: segment.end_time,
      messages: segment.messages.into_iter().map(PublicMessage::from).collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMessage {
  pub time: DateTime<Utc>,
  pub contents: String,
}

impl From<MessageEntity> for PublicMessage {
  fn from(message: MessageEntity) -> Self {
    Self {
      time: message.time,
      contents: message.contents,
    }
  }
}
