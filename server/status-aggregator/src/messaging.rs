//! Keeps each event's narrative in step with its lifecycle.
//!
//! After an event is updated, the provider derives the messages the event
//! should have by now and the iterator writes the ones that are missing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::component::{Component, ComponentFactory, PATH_SEPARATOR};
use crate::entity::{ComponentAffecting, ComponentStatus, Entity, EventEntity, MessageEntity, MessageType};
use crate::error::Result;
use crate::store::{self, Store};
use crate::update::UpdateListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageChangeKind {
  Start,
  End,
  /// Operator-authored text, written verbatim.
  Manual(String),
}

impl MessageChangeKind {
  fn message_type(&self) -> MessageType {
    match self {
      Self::Start => MessageType::Start,
      Self::End => MessageType::End,
      Self::Manual(_) => MessageType::Manual,
    }
  }
}

/// A message an event should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChangeEvent {
  pub time: DateTime<Utc>,
  pub affected_component_path: String,
  pub affected_component_status: ComponentStatus,
  pub kind: MessageChangeKind,
}

impl MessageChangeEvent {
  fn for_event(event: &EventEntity, time: DateTime<Utc>, kind: MessageChangeKind) -> Self {
    Self {
      time,
      affected_component_path: event.affected_path().to_string(),
      affected_component_status: event.status(),
      kind,
    }
  }

  pub fn manual(event: &EventEntity, time: DateTime<Utc>, contents: impl Into<String>) -> Self {
    Self::for_event(event, time, MessageChangeKind::Manual(contents.into()))
  }
}

/// Lifecycle messages `event` should have as of `cursor`.
///
/// An active event gets its Start only once it has lasted `start_delay`.
/// A closed event that never lasted that long gets nothing at all.
pub fn message_changes(
  event: &EventEntity,
  cursor: DateTime<Utc>,
  start_delay: Duration,
) -> Vec<MessageChangeEvent> {
  let start = event.start_time();
  match event.end_time() {
    None if cursor >= start + start_delay => {
      vec![MessageChangeEvent::for_event(event, start, MessageChangeKind::Start)]
    }
    None => Vec::new(),
    Some(end) if end - start < start_delay => Vec::new(),
    Some(end) => vec![
      MessageChangeEvent::for_event(event, start, MessageChangeKind::Start),
      MessageChangeEvent::for_event(event, end, MessageChangeKind::End),
    ],
  }
}

/// Renders Start and End narrative text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageContentBuilder;

impl MessageContentBuilder {
  pub fn start(&self, component: &Component, status: ComponentStatus) -> String {
    format!(
      "**{} is {}.** You may encounter issues {}.",
      component.name,
      status.as_phrase(),
      action(component)
    )
  }

  pub fn end(&self, component: &Component, status: ComponentStatus) -> String {
    format!(
      "**{} is no longer {}.** You should no longer encounter any issues {}. Thank you for your patience.",
      component.name,
      status.as_phrase(),
      action(component)
    )
  }
}

fn action(component: &Component) -> String {
  if component.description.is_empty() {
    format!("with {}", component.name)
  } else {
    component.description.clone()
  }
}

/// Writes missing messages for an event.
pub struct MessageChangeIterator<S> {
  store: Arc<S>,
  components: Arc<dyn ComponentFactory>,
  contents: MessageContentBuilder,
}

impl<S: Store> MessageChangeIterator<S> {
  pub fn new(store: Arc<S>, components: Arc<dyn ComponentFactory>) -> Self {
    Self {
      store,
      components,
      contents: MessageContentBuilder,
    }
  }

  /// Applies `changes` in time order and returns how many rows were written.
  pub async fn apply(&self, event: &EventEntity, mut changes: Vec<MessageChangeEvent>) -> Result<usize> {
    changes.sort_by(|a, b| a.time.cmp(&b.time));

    let existing = store::messages_for(self.store.as_ref(), event).await?;
    let mut start_open = existing
      .iter()
      .rev()
      .find(|m| m.message_type != MessageType::Manual)
      .map_or(false, |m| m.message_type == MessageType::Start);

    let topology = self.components.create();
    let mut written = 0;

    for change in changes {
      let contents = match &change.kind {
        MessageChangeKind::Start => {
          if start_open {
            continue;
          }
          let Some(component) = topology.get_by_path(&change.affected_component_path) else {
            tracing::warn!(
              event = event.row_key(),
              path = %change.affected_component_path,
              "event path not in topology, skipping start message"
            );
            continue;
          };
          start_open = true;
          self.contents.start(component, change.affected_component_status)
        }
        MessageChangeKind::End => {
          if !start_open {
            continue;
          }
          start_open = false;
          let component = topology
            .get_by_path(&change.affected_component_path)
            .cloned()
            .unwrap_or_else(|| Component::new(leaf_name(&change.affected_component_path)));
          self.contents.end(&component, change.affected_component_status)
        }
        MessageChangeKind::Manual(text) => text.clone(),
      };

      let message = MessageEntity::new(event, change.time, contents, change.kind.message_type());
      if self.store.get::<MessageEntity>(&message.row_key).await?.is_some() {
        continue;
      }
      self.store.insert_or_replace(&message).await?;
      written += 1;
      tracing::info!(
        event = event.row_key(),
        message = %message.row_key,
        message_type = message.message_type.as_str(),
        "wrote event message"
      );
    }

    Ok(written)
  }
}

fn leaf_name(path: &str) -> &str {
  path.rsplit(PATH_SEPARATOR).next().unwrap_or(path)
}

/// Posts lifecycle messages whenever an event is updated.
pub struct MessageUpdateListener<S> {
  iterator: MessageChangeIterator<S>,
  start_delay: Duration,
}

impl<S: Store> MessageUpdateListener<S> {
  pub fn new(iterator: MessageChangeIterator<S>, start_delay: Duration) -> Self {
    Self {
      iterator,
      start_delay,
    }
  }
}

#[async_trait]
impl<S: Store> UpdateListener<EventEntity> for MessageUpdateListener<S> {
  async fn on_updated(&self, event: &EventEntity, cursor: DateTime<Utc>) -> Result<()> {
    let changes = message_changes(event, cursor, self.start_delay);
    if changes.is_empty() {
      return Ok(());
    }
    let written = self.iterator.apply(event, changes).await?;
    tracing::debug!(event = event.row_key(), written, "message update");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::InMemoryStore;
  use chrono::TimeZone;

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
  }

  fn topology() -> Component {
    Component::new("Service").with_subcomponent(
      Component::new("Api")
        .with_description("when calling the API")
        .with_subcomponent(Component::new("Search")),
    )
  }

  fn event(path: &str, end: Option<DateTime<Utc>>) -> EventEntity {
    let mut event = EventEntity::new(path, ComponentStatus::Degraded, t0(), "1");
    if let Some(end) = end {
      event.fields.close(end);
    }
    event
  }

  fn iterator(store: &Arc<InMemoryStore>) -> MessageChangeIterator<InMemoryStore> {
    MessageChangeIterator::new(store.clone(), Arc::new(topology()))
  }

  #[test]
  fn active_event_waits_for_start_delay() {
    let e = event("Service/Api", None);
    let delay = Duration::minutes(15);
    assert!(message_changes(&e, t0() + Duration::minutes(14), delay).is_empty());

    let changes = message_changes(&e, t0() + Duration::minutes(15), delay);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, MessageChangeKind::Start);
    assert_eq!(changes[0].time, t0());
  }

  #[test]
  fn short_closed_event_is_never_published() {
    let e = event("Service/Api", Some(t0() + Duration::minutes(5)));
    assert!(message_changes(&e, t0() + Duration::days(1), Duration::minutes(15)).is_empty());
  }

  #[test]
  fn closed_event_gets_start_and_end() {
    let end = t0() + Duration::hours(1);
    let e = event("Service/Api", Some(end));
    let kinds: Vec<_> = message_changes(&e, end, Duration::minutes(15))
      .into_iter()
      .map(|c| (c.kind, c.time))
      .collect();
    assert_eq!(kinds, vec![(MessageChangeKind::Start, t0()), (MessageChangeKind::End, end)]);
  }

  #[test]
  fn contents_use_description_or_name() {
    let builder = MessageContentBuilder;
    let api = topology().get_by_path("Service/Api").cloned().unwrap();
    assert_eq!(
      builder.start(&api, ComponentStatus::Degraded),
      "**Api is degraded.** You may encounter issues when calling the API."
    );

    let search = Component::new("Search");
    assert_eq!(
      builder.end(&search, ComponentStatus::Down),
      "**Search is no longer down.** You should no longer encounter any issues with Search. Thank you for your patience."
    );
  }

  #[tokio::test]
  async fn start_is_written_once() {
    let store = Arc::new(InMemoryStore::new());
    let it = iterator(&store);
    let e = event("Service/Api", None);
    let changes = message_changes(&e, t0() + Duration::hours(1), Duration::minutes(15));

    assert_eq!(it.apply(&e, changes.clone()).await.unwrap(), 1);
    assert_eq!(it.apply(&e, changes).await.unwrap(), 0);
    assert_eq!(store.count(MessageEntity::PARTITION).unwrap(), 1);
  }

  #[tokio::test]
  async fn end_follows_start_across_passes() {
    let store = Arc::new(InMemoryStore::new());
    let it = iterator(&store);
    let mut e = event("Service/Api", None);
    let delay = Duration::minutes(15);
    it.apply(&e, message_changes(&e, t0() + Duration::hours(1), delay))
      .await
      .unwrap();

    let end = t0() + Duration::hours(2);
    e.fields.close(end);
    assert_eq!(it.apply(&e, message_changes(&e, end, delay)).await.unwrap(), 1);
    // Replaying the closed event writes nothing new.
    assert_eq!(it.apply(&e, message_changes(&e, end, delay)).await.unwrap(), 0);

    let messages = store::messages_for(store.as_ref(), &e).await.unwrap();
    let types: Vec<_> = messages.iter().map(|m| m.message_type).collect();
    assert_eq!(types, vec![MessageType::Start, MessageType::End]);
    assert!(messages[1].contents.starts_with("**Api is no longer degraded.**"));
  }

  #[tokio::test]
  async fn unresolvable_path_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let it = iterator(&store);
    let e = event("Service/Unknown", Some(t0() + Duration::hours(1)));
    let changes = message_changes(&e, t0() + Duration::hours(1), Duration::minutes(15));

    // No Start is written, so the End has nothing to close.
    assert_eq!(it.apply(&e, changes).await.unwrap(), 0);
    assert_eq!(store.count(MessageEntity::PARTITION).unwrap(), 0);
  }

  #[tokio::test]
  async fn manual_messages_are_always_written() {
    let store = Arc::new(InMemoryStore::new());
    let it = iterator(&store);
    let e = event("Service/Unknown", None);
    let change = MessageChangeEvent::manual(&e, t0(), "Investigating.");

    assert_eq!(it.apply(&e, vec![change]).await.unwrap(), 1);
    let messages = store::messages_for(store.as_ref(), &e).await.unwrap();
    assert_eq!(messages[0].contents, "Investigating.");
    assert_eq!(messages[0].message_type, MessageType::Manual);
  }

  #[tokio::test]
  async fn listener_posts_start_after_delay() {
    let store = Arc::new(InMemoryStore::new());
    let listener = MessageUpdateListener::new(iterator(&store), Duration::minutes(15));
    let e = event("Service/Api", None);

    listener.on_updated(&e, t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(store.count(MessageEntity::PARTITION).unwrap(), 0);

    listener.on_updated(&e, t0() + Duration::minutes(20)).await.unwrap();
    assert_eq!(store.count(MessageEntity::PARTITION).unwrap(), 1);
  }
}
