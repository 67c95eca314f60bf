//! Operator-authored status changes.
//!
//! Manual events have no linked groups, so the update engine never closes
//! them and the factory never links incidents into them. Their lifecycle is
//! driven entirely by later manual changes.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::ComponentFactory;
use crate::entity::{ComponentAffecting, ComponentStatus, Entity, EventEntity, MessageEntity};
use crate::error::{AggregatorError, Result};
use crate::messaging::{MessageChangeEvent, MessageChangeIterator};
use crate::store::Store;

/// Seed for row keys of manually created events.
const MANUAL_EVENT_SEED: &str = "manual";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManualStatusChange {
  AddStatusEvent {
    path: String,
    status: ComponentStatus,
    #[serde(default)]
    message: String,
    #[serde(default = "default_active")]
    is_active: bool,
  },
  EditStatusEvent {
    event_row_key: String,
    status: ComponentStatus,
    is_active: bool,
  },
  AddStatusMessage {
    event_row_key: String,
    message: String,
  },
  EditStatusMessage {
    message_row_key: String,
    message: String,
  },
  DeleteStatusMessage {
    message_row_key: String,
  },
}

fn default_active() -> bool {
  true
}

/// A manual change and when the operator made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualStatusChangeEntry {
  pub timestamp: DateTime<Utc>,
  #[serde(flatten)]
  pub change: ManualStatusChange,
}

/// Log of manual changes.
#[async_trait]
pub trait ManualChangeSource: Send + Sync {
  /// Changes made strictly after `since` (all changes when `None`), oldest first.
  async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ManualStatusChangeEntry>>;
}

/// Manual change log held in memory.
#[derive(Debug, Default)]
pub struct RecordedManualChanges {
  entries: RwLock<Vec<ManualStatusChangeEntry>>,
}

impl RecordedManualChanges {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, entry: ManualStatusChangeEntry) -> Result<()> {
    let mut entries = self
      .entries
      .write()
      .map_err(|_| AggregatorError::store("manual change log poisoned"))?;
    entries.push(entry);
    Ok(())
  }
}

#[async_trait]
impl ManualChangeSource for RecordedManualChanges {
  async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ManualStatusChangeEntry>> {
    let entries = self
      .entries
      .read()
      .map_err(|_| AggregatorError::store("manual change log poisoned"))?;
    let mut out: Vec<_> = entries
      .iter()
      .filter(|e| since.map_or(true, |s| e.timestamp > s))
      .cloned()
      .collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(out)
  }
}

/// Applies manual changes to the store.
pub struct ManualChangeHandler<S> {
  store: Arc<S>,
  messages: MessageChangeIterator<S>,
}

impl<S: Store> ManualChangeHandler<S> {
  pub fn new(store: Arc<S>, components: Arc<dyn ComponentFactory>) -> Self {
    Self {
      messages: MessageChangeIterator::new(store.clone(), components),
      store,
    }
  }

  pub async fn apply(&self, entry: &ManualStatusChangeEntry) -> Result<()> {
    let at = entry.timestamp;
    match &entry.change {
      ManualStatusChange::AddStatusEvent {
        path,
        status,
        message,
        is_active,
      } => {
        let mut event = EventEntity::new(path, *status, at, MANUAL_EVENT_SEED);
        if self.store.get::<EventEntity>(event.row_key()).await?.is_some() {
          tracing::debug!(row_key = event.row_key(), "manual event already exists");
          return Ok(());
        }
        if !is_active {
          event.fields.close(at);
        }
        self.store.insert_or_replace(&event).await?;
        tracing::info!(row_key = event.row_key(), path = %path, "created manual event");
        self.post(&event, at, message).await?;
      }

      ManualStatusChange::EditStatusEvent {
        event_row_key,
        status,
        is_active,
      } => {
        let mut event = self.event(event_row_key).await?;
        event.fields.affected_component_status = *status;
        match (*is_active, event.is_active()) {
          // Ended prematurely: reopen.
          (true, false) => event.fields.end_time = None,
          (false, true) => event.fields.close(at),
          _ => {}
        }
        self.store.replace(&event).await?;
        tracing::info!(
          row_key = event.row_key(),
          status = ?event.status(),
          active = event.is_active(),
          "edited event"
        );
      }

      ManualStatusChange::AddStatusMessage {
        event_row_key,
        message,
      } => {
        let event = self.event(event_row_key).await?;
        self.post(&event, at, message).await?;
      }

      ManualStatusChange::EditStatusMessage {
        message_row_key,
        message,
      } => {
        let mut existing = self.message(message_row_key).await?;
        existing.contents = message.clone();
        self.store.replace(&existing).await?;
        tracing::info!(row_key = %existing.row_key, "edited message");
      }

      ManualStatusChange::DeleteStatusMessage { message_row_key } => {
        // Blank messages are dropped from every export.
        let mut existing = self.message(message_row_key).await?;
        existing.contents.clear();
        self.store.replace(&existing).await?;
        tracing::info!(row_key = %existing.row_key, "deleted message");
      }
    }
    Ok(())
  }

  async fn post(&self, event: &EventEntity, at: DateTime<Utc>, message: &str) -> Result<()> {
    if message.trim().is_empty() {
      return Ok(());
    }
    self
      .messages
      .apply(event, vec![MessageChangeEvent::manual(event, at, message)])
      .await?;
    Ok(())
  }

  async fn event(&self, row_key: &str) -> Result<EventEntity> {
    self
      .store
      .get::<EventEntity>(row_key)
      .await?
      .ok_or_else(|| AggregatorError::not_found(EventEntity::PARTITION, row_key))
  }

  async fn message(&self, row_key: &str) -> Result<MessageEntity> {
    self
      .store
      .get::<MessageEntity>(row_key)
      .await?
      .ok_or_else(|| AggregatorError::not_found(MessageEntity::PARTITION, row_key))
  }
}
