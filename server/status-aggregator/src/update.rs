//! Bottom-up liveness updates.
//!
//! Incidents are refreshed from the incident API; aggregations stay open
//! while any child is active or ended within the grace delay of the cursor,
//! and otherwise close at their latest child's end.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::entity::{Aggregation, ComponentAffecting, IncidentEntity};
use crate::error::Result;
use crate::incident::{IncidentApi, IncidentApiError};
use crate::store::{self, Store};

/// Refreshes one entity as of `cursor`, persisting any change.
#[async_trait]
pub trait EntityUpdater<T>: Send + Sync {
  /// Returns `true` when the entity is inactive after the update.
  async fn update(&self, entity: &mut T, cursor: DateTime<Utc>) -> Result<bool>;
}

/// Called, in registration order, after an aggregation has been updated.
///
/// An error from a listener aborts the update.
#[async_trait]
pub trait UpdateListener<T>: Send + Sync {
  async fn on_updated(&self, entity: &T, cursor: DateTime<Utc>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Leaf: incidents
// ---------------------------------------------------------------------------

pub struct IncidentUpdater<S> {
  store: Arc<S>,
  api: Arc<dyn IncidentApi>,
}

impl<S: Store> IncidentUpdater<S> {
  pub fn new(store: Arc<S>, api: Arc<dyn IncidentApi>) -> Self {
    Self { store, api }
  }
}

#[async_trait]
impl<S: Store> EntityUpdater<IncidentEntity> for IncidentUpdater<S> {
  async fn update(&self, incident: &mut IncidentEntity, cursor: DateTime<Utc>) -> Result<bool> {
    if !incident.is_active() {
      return Ok(true);
    }

    let mitigated_at = match self.api.get_incident(&incident.incident_api_id).await {
      Ok(remote) => remote.mitigated_at,
      Err(IncidentApiError::NotFound(_)) => {
        // Deleted upstream: nothing left to wait for.
        tracing::warn!(
          row_key = %incident.fields.row_key,
          incident_api_id = %incident.incident_api_id,
          %cursor,
          "incident not found upstream, treating as mitigated"
        );
        Some(cursor)
      }
      Err(e) => return Err(e.into()),
    };

    // A missing mitigation never reopens an incident.
    if let Some(end) = mitigated_at {
      if incident.end_time() != Some(end) {
        incident.fields.close(end);
        self.store.replace(&*incident).await?;
        tracing::info!(
          row_key = %incident.fields.row_key,
          incident_api_id = %incident.incident_api_id,
          end_time = ?incident.end_time(),
          "incident mitigated"
        );
      }
    }

    Ok(!incident.is_active())
  }
}

// ---------------------------------------------------------------------------
// Aggregations: groups and events
// ---------------------------------------------------------------------------

/// Updates an aggregation by first updating every child it links.
pub struct AggregationUpdater<S, A: Aggregation> {
  store: Arc<S>,
  child_updater: Arc<dyn EntityUpdater<A::Child>>,
  end_delay: Duration,
  listeners: Vec<Arc<dyn UpdateListener<A>>>,
  _kind: PhantomData<fn() -> A>,
}

impl<S: Store, A: Aggregation> AggregationUpdater<S, A> {
  pub fn new(store: Arc<S>, child_updater: Arc<dyn EntityUpdater<A::Child>>, end_delay: Duration) -> Self {
    Self {
      store,
      child_updater,
      end_delay,
      listeners: Vec::new(),
      _kind: PhantomData,
    }
  }

  /// Registers a listener; listeners run in registration order.
  pub fn with_listener(mut self, listener: Arc<dyn UpdateListener<A>>) -> Self {
    self.listeners.push(listener);
    self
  }

  /// Updates every active aggregation of this kind, cascading to children.
  pub async fn update_all_active(&self, cursor: DateTime<Utc>) -> Result<usize> {
    let mut actives = store::active::<A, _>(self.store.as_ref()).await?;
    let mut closed = 0;
    for aggregation in &mut actives {
      if self.update(aggregation, cursor).await? {
        closed += 1;
      }
    }
    tracing::debug!(
      kind = A::PARTITION,
      active = actives.len(),
      closed,
      %cursor,
      "updated active aggregations"
    );
    Ok(closed)
  }
}

#[async_trait]
impl<S: Store, A: Aggregation> EntityUpdater<A> for AggregationUpdater<S, A> {
  async fn update(&self, aggregation: &mut A, cursor: DateTime<Utc>) -> Result<bool> {
    if !aggregation.is_active() {
      return Ok(true);
    }

    let mut children = store::children::<A::Child, _>(self.store.as_ref(), &*aggregation).await?;
    if children.is_empty() {
      // Manually authored aggregations are outside the automated lifecycle.
      tracing::info!(
        kind = A::PARTITION,
        row_key = aggregation.row_key(),
        "aggregation has no linked children, leaving untouched"
      );
      return Ok(false);
    }

    let recent_cutoff = cursor - self.end_delay;
    let mut has_active_or_recent = false;
    for child in &mut children {
      let inactive = self.child_updater.update(child, cursor).await?;
      let recent = child.end_time().map_or(true, |end| end > recent_cutoff);
      if !inactive || recent {
        has_active_or_recent = true;
      }
    }

    if !has_active_or_recent {
      if let Some(end) = children.iter().filter_map(|c| c.end_time()).max() {
        aggregation.fields_mut().close(end);
        self.store.replace(&*aggregation).await?;
        tracing::info!(
          kind = A::PARTITION,
          row_key = aggregation.row_key(),
          end_time = %end,
          "aggregation deactivated"
        );
      }
    }

    for listener in &self.listeners {
      listener.on_updated(&*aggregation, cursor).await?;
    }

    Ok(!aggregation.is_active())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::{
    Aggregated, ComponentStatus, Entity, EventEntity, IncidentGroupEntity,
  };
  use crate::incident::{Incident, ParsedIncident, RecordedIncidentApi};
  use crate::store::InMemoryStore;
  use chrono::TimeZone;
  use std::sync::Mutex;

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
  }

  fn parsed(id: &str, start: DateTime<Utc>) -> ParsedIncident {
    ParsedIncident {
      id: id.into(),
      affected_component_path: "Service/Api/Search".into(),
      affected_component_status: ComponentStatus::Degraded,
      start_time: start,
      end_time: None,
    }
  }

  fn remote(id: &str, start: DateTime<Utc>, mitigated_at: Option<DateTime<Utc>>) -> Incident {
    Incident {
      id: id.into(),
      title: "t".into(),
      severity: 2,
      created_at: start,
      mitigated_at,
    }
  }

  struct Fixture {
    store: Arc<InMemoryStore>,
    api: Arc<RecordedIncidentApi>,
    event: EventEntity,
    group: IncidentGroupEntity,
  }

  /// One event -> one group -> the given incidents, all persisted.
  async fn fixture(incidents: &[(&str, Option<DateTime<Utc>>)]) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let api = Arc::new(RecordedIncidentApi::new());
    let first = parsed(incidents[0].0, t0());
    let event = EventEntity::new("Service/Api", ComponentStatus::Degraded, t0(), &first.id);
    let group = IncidentGroupEntity::link(&event, &first, first.affected_component_path.clone());
    store.insert_or_replace(&event).await.unwrap();
    store.insert_or_replace(&group).await.unwrap();
    for (id, mitigated) in incidents {
      let input = parsed(id, t0());
      let incident = IncidentEntity::link(&group, &input, input.affected_component_path.clone());
      store.insert_or_replace(&incident).await.unwrap();
      api.record(remote(id, t0(), *mitigated)).unwrap();
    }
    Fixture {
      store,
      api,
      event,
      group,
    }
  }

  fn group_updater(f: &Fixture, delay: Duration) -> AggregationUpdater<InMemoryStore, IncidentGroupEntity> {
    let leaf = Arc::new(IncidentUpdater::new(f.store.clone(), f.api.clone()));
    AggregationUpdater::new(f.store.clone(), leaf, delay)
  }

  #[tokio::test]
  async fn incident_picks_up_mitigation() {
    let end = t0() + Duration::minutes(20);
    let f = fixture(&[("1", Some(end))]).await;
    let updater = IncidentUpdater::new(f.store.clone(), f.api.clone());
    let mut incident = store::children::<IncidentEntity, _>(f.store.as_ref(), &f.group)
      .await
      .unwrap()
      .remove(0);

    assert!(updater.update(&mut incident, t0() + Duration::hours(1)).await.unwrap());
    let stored = f
      .store
      .get::<IncidentEntity>(incident.row_key())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.end_time(), Some(end));
  }

  #[tokio::test]
  async fn incident_not_found_is_mitigated_at_cursor() {
    let f = fixture(&[("1", None)]).await;
    f.api.forget("1").unwrap();
    let updater = IncidentUpdater::new(f.store.clone(), f.api.clone());
    let mut incident = store::children::<IncidentEntity, _>(f.store.as_ref(), &f.group)
      .await
      .unwrap()
      .remove(0);
    let cursor = t0() + Duration::hours(2);

    assert!(updater.update(&mut incident, cursor).await.unwrap());
    let stored = f
      .store
      .get::<IncidentEntity>(incident.row_key())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.end_time(), Some(cursor));
    assert!(!stored.is_active());
  }

  struct FailingApi;

  #[async_trait]
  impl IncidentApi for FailingApi {
    async fn get_incident(&self, _id: &str) -> std::result::Result<Incident, IncidentApiError> {
      Err(IncidentApiError::Request("connection reset".into()))
    }

    async fn list_incidents(
      &self,
      _since: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<Incident>, IncidentApiError> {
      Ok(Vec::new())
    }
  }

  #[tokio::test]
  async fn transient_api_errors_propagate() {
    let f = fixture(&[("1", None)]).await;
    let updater = IncidentUpdater::new(f.store.clone(), Arc::new(FailingApi));
    let mut incident = store::children::<IncidentEntity, _>(f.store.as_ref(), &f.group)
      .await
      .unwrap()
      .remove(0);
    assert!(updater.update(&mut incident, t0()).await.is_err());
    assert!(incident.is_active());
  }

  #[tokio::test]
  async fn group_stays_open_within_grace_delay() {
    let end = t0() + Duration::minutes(10);
    let f = fixture(&[("1", Some(end))]).await;
    let updater = group_updater(&f, Duration::minutes(15));
    let mut group = f.group.clone();

    // Ended 10 minutes before the cursor: still recent.
    let inactive = updater.update(&mut group, end + Duration::minutes(10)).await.unwrap();
    assert!(!inactive);
    assert!(group.is_active());
  }

  #[tokio::test]
  async fn group_closes_at_latest_child_end() {
    let early = t0() + Duration::minutes(5);
    let late = t0() + Duration::minutes(25);
    let f = fixture(&[("1", Some(early)), ("2", Some(late))]).await;
    let updater = group_updater(&f, Duration::minutes(15));
    let mut group = f.group.clone();

    let inactive = updater.update(&mut group, late + Duration::minutes(16)).await.unwrap();
    assert!(inactive);
    assert_eq!(group.end_time(), Some(late));
    let stored = f
      .store
      .get::<IncidentGroupEntity>(group.row_key())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.end_time(), Some(late));
  }

  #[tokio::test]
  async fn active_child_keeps_group_open() {
    let f = fixture(&[("1", Some(t0())), ("2", None)]).await;
    let updater = group_updater(&f, Duration::minutes(15));
    let mut group = f.group.clone();
    assert!(!updater.update(&mut group, t0() + Duration::days(1)).await.unwrap());
  }

  #[tokio::test]
  async fn childless_aggregation_is_left_untouched() {
    let store = Arc::new(InMemoryStore::new());
    let api = Arc::new(RecordedIncidentApi::new());
    let mut event = EventEntity::new("Service/Api", ComponentStatus::Down, t0(), "manual");
    store.insert_or_replace(&event).await.unwrap();

    let leaf = Arc::new(IncidentUpdater::new(store.clone(), api));
    let groups = Arc::new(AggregationUpdater::<_, IncidentGroupEntity>::new(
      store.clone(),
      leaf,
      Duration::minutes(15),
    ));
    let events = AggregationUpdater::<_, EventEntity>::new(store.clone(), groups, Duration::minutes(15));

    assert!(!events.update(&mut event, t0() + Duration::days(30)).await.unwrap());
    assert!(event.is_active());
  }

  #[derive(Default)]
  struct Recorder {
    seen: Mutex<Vec<(String, bool)>>,
  }

  #[async_trait]
  impl UpdateListener<EventEntity> for Recorder {
    async fn on_updated(&self, entity: &EventEntity, _cursor: DateTime<Utc>) -> Result<()> {
      self
        .seen
        .lock()
        .unwrap()
        .push((entity.row_key().to_string(), entity.is_active()));
      Ok(())
    }
  }

  #[tokio::test]
  async fn cascade_closes_event_and_notifies_listeners() {
    let end = t0() + Duration::minutes(30);
    let f = fixture(&[("1", Some(end))]).await;
    let leaf = Arc::new(IncidentUpdater::new(f.store.clone(), f.api.clone()));
    let groups = Arc::new(AggregationUpdater::<_, IncidentGroupEntity>::new(
      f.store.clone(),
      leaf,
      Duration::minutes(15),
    ));
    let recorder = Arc::new(Recorder::default());
    let events = AggregationUpdater::<_, EventEntity>::new(f.store.clone(), groups, Duration::minutes(15))
      .with_listener(recorder.clone());

    // First pass inside the grace window keeps both levels open.
    assert_eq!(events.update_all_active(end + Duration::minutes(5)).await.unwrap(), 0);
    // Second pass past it closes the group, and with it the event.
    assert_eq!(events.update_all_active(end + Duration::hours(1)).await.unwrap(), 1);

    let event = f
      .store
      .get::<EventEntity>(f.event.row_key())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event.end_time(), Some(end));
    assert!(store::active::<EventEntity, _>(f.store.as_ref())
      .await
      .unwrap()
      .is_empty());

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(
      seen,
      vec![
        (f.event.row_key().to_string(), true),
        (f.event.row_key().to_string(), false)
      ]
    );
  }
}
