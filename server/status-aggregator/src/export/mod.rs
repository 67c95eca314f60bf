//! Projects persisted state onto the public contract.
//!
//! Only published events (at least one visible message) reach either the
//! component tree or the timeline.

pub mod contract;
pub mod segment;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::component::{Component, ComponentFactory};
use crate::entity::{ComponentAffecting, EventEntity, IncidentGroupEntity};
use crate::error::Result;
use crate::store::{self, Store};

pub use contract::{PublicComponent, PublicEvent, PublicMessage, ServiceStatus};
pub use segment::{segment_event, TimelineSegment};

/// Whether an event has something worth showing.
async fn is_published<S: Store>(store: &S, event: &EventEntity) -> Result<bool> {
  let messages = store::messages_for(store, event).await?;
  Ok(messages.iter().any(|m| !m.contents.trim().is_empty()))
}

fn apply_at<T: ComponentAffecting>(root: &mut Component, entity: &T) {
  match root.get_by_path_mut(entity.affected_path()) {
    Some(component) => component.apply_status(entity.status()),
    None => tracing::debug!(
      kind = T::PARTITION,
      row_key = entity.row_key(),
      path = entity.affected_path(),
      "path not in topology, ignoring"
    ),
  }
}

/// Builds the current component tree.
pub struct ComponentExporter<S> {
  store: Arc<S>,
  components: Arc<dyn ComponentFactory>,
}

impl<S: Store> ComponentExporter<S> {
  pub fn new(store: Arc<S>, components: Arc<dyn ComponentFactory>) -> Self {
    Self { store, components }
  }

  /// Fresh topology with published active events and their active groups applied.
  pub async fn export(&self) -> Result<Component> {
    let mut root = self.components.create();

    let mut published = HashSet::new();
    for event in store::active::<EventEntity, _>(self.store.as_ref()).await? {
      if !is_published(self.store.as_ref(), &event).await? {
        continue;
      }
      apply_at(&mut root, &event);
      published.insert(event.fields.row_key);
    }

    let groups = store::active::<IncidentGroupEntity, _>(self.store.as_ref()).await?;
    for group in groups.iter().filter(|g| published.contains(&g.parent_row_key)) {
      apply_at(&mut root, group);
    }

    Ok(root)
  }
}

/// Builds the public event timeline.
pub struct EventExporter<S> {
  store: Arc<S>,
  visibility: Duration,
}

impl<S: Store> EventExporter<S> {
  pub fn new(store: Arc<S>, visibility: Duration) -> Self {
    Self { store, visibility }
  }

  /// Active events and events ended within the visibility period before `cursor`.
  pub async fn export(&self, cursor: DateTime<Utc>) -> Result<Vec<PublicEvent>> {
    let since = cursor - self.visibility;
    let events = self
      .store
      .query::<EventEntity>(&|e: &EventEntity| {
        e.end_time().map_or(true, |end| end >= since && end <= cursor)
      })
      .await?;

    let mut out = Vec::new();
    for event in &events {
      let messages = store::messages_for(self.store.as_ref(), event).await?;
      for segment in segment_event(event, messages) {
        if !segment.messages.is_empty() {
          out.push(PublicEvent::from_segment(event.affected_path(), segment));
        }
      }
    }
    Ok(out)
  }
}

/// Produces the full [`ServiceStatus`] document.
pub struct StatusExporter<S> {
  components: ComponentExporter<S>,
  events: EventExporter<S>,
}

impl<S: Store> StatusExporter<S> {
  pub fn new(store: Arc<S>, components: Arc<dyn ComponentFactory>, visibility: Duration) -> Self {
    Self {
      components: ComponentExporter::new(store.clone(), components),
      events: EventExporter::new(store, visibility),
    }
  }

  pub async fn export(&self, cursor: DateTime<Utc>) -> Result<ServiceStatus> {
    let root = self.components.export().await?;
    let events = self.events.export(cursor).await?;
    let last_updated = events
      .iter()
      .flat_map(|e| e.messages.iter().map(|m| m.time))
      .max();

    tracing::info!(
      %cursor,
      status = ?root.effective_status(),
      events = events.len(),
      "exported service status"
    );

    Ok(ServiceStatus {
      last_built: cursor,
      last_updated,
      service_status: PublicComponent::from(&root),
      events,
    })
  }
}
