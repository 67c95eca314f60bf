//! One full aggregation pass: ingest, apply manual changes, update, export.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::component::ComponentFactory;
use crate::config::Config;
use crate::entity::{CursorEntity, EventEntity, IncidentEntity, IncidentGroupEntity};
use crate::error::{AggregatorError, Result};
use crate::export::{ServiceStatus, StatusExporter};
use crate::factory::{
  AggregatedFactory, EntityFactory, EventFactory, ExactPath, ExistingAggregationProvider, LinkHandler,
  PrefixPath, RaiseAncestorStatusListener, RaiseStatusListener,
};
use crate::incident::IncidentApi;
use crate::manual::{ManualChangeHandler, ManualChangeSource};
use crate::messaging::{MessageChangeIterator, MessageUpdateListener};
use crate::parse::{parse_all, IncidentParser, RegexIncidentParser};
use crate::store::Store;
use crate::update::{AggregationUpdater, EntityUpdater, IncidentUpdater};

pub const INCIDENTS_CURSOR: &str = "incidents";
pub const MANUAL_CURSOR: &str = "manual";
pub const STATUS_CURSOR: &str = "status";

pub async fn read_cursor<S: Store + ?Sized>(store: &S, name: &str) -> Result<Option<DateTime<Utc>>> {
  Ok(store.get::<CursorEntity>(name).await?.map(|c| c.value))
}

pub async fn write_cursor<S: Store + ?Sized>(store: &S, name: &str, value: DateTime<Utc>) -> Result<()> {
  store
    .insert_or_replace(&CursorEntity {
      name: name.to_string(),
      value,
    })
    .await
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
  pub incidents_listed: usize,
  pub incidents_created: usize,
  pub manual_changes: usize,
  pub manual_changes_skipped: usize,
  pub events_closed: usize,
}

#[derive(Debug, Clone)]
pub struct PassOutput {
  pub summary: PassSummary,
  pub status: ServiceStatus,
}

pub struct StatusUpdater<S> {
  store: Arc<S>,
  api: Arc<dyn IncidentApi>,
  parsers: Vec<Box<dyn IncidentParser>>,
  incidents: AggregatedFactory<S, IncidentEntity>,
  events: Arc<AggregationUpdater<S, EventEntity>>,
  manual_source: Arc<dyn ManualChangeSource>,
  manual: ManualChangeHandler<S>,
  exporter: StatusExporter<S>,
}

impl<S: Store + 'static> StatusUpdater<S> {
  /// Wires the full pipeline from configuration.
  ///
  /// # Errors
  ///
  /// Fails when a configured parser is invalid.
  pub fn new(
    store: Arc<S>,
    api: Arc<dyn IncidentApi>,
    manual_source: Arc<dyn ManualChangeSource>,
    config: &Config,
  ) -> Result<Self> {
    let parsers = config
      .parsers
      .iter()
      .map(|p| RegexIncidentParser::new(p).map(|p| Box::new(p) as Box<dyn IncidentParser>))
      .collect::<Result<Vec<_>>>()?;

    let topology: Arc<dyn ComponentFactory> = Arc::new(config.topology.clone());
    let end_delay = config.event_end_delay();

    let leaf: Arc<dyn EntityUpdater<IncidentEntity>> =
      Arc::new(IncidentUpdater::new(store.clone(), api.clone()));
    let groups = Arc::new(AggregationUpdater::<S, IncidentGroupEntity>::new(
      store.clone(),
      leaf,
      end_delay,
    ));
    let messages = MessageUpdateListener::new(
      MessageChangeIterator::new(store.clone(), topology.clone()),
      config.event_start_message_delay(),
    );
    let events = Arc::new(
      AggregationUpdater::<S, EventEntity>::new(store.clone(), groups.clone(), end_delay)
        .with_listener(Arc::new(messages)),
    );

    let event_factory: Arc<dyn EntityFactory<EventEntity>> =
      Arc::new(EventFactory::new(store.clone(), Arc::new(PrefixPath::default())));
    let group_factory = AggregatedFactory::<S, IncidentGroupEntity>::new(
      store.clone(),
      Arc::new(ExactPath),
      ExistingAggregationProvider::new(
        store.clone(),
        Arc::new(PrefixPath::default()),
        LinkHandler::new(store.clone(), events.clone()),
      ),
      event_factory,
    )
    .with_listener(Arc::new(RaiseStatusListener::new(store.clone())));
    let incidents = AggregatedFactory::<S, IncidentEntity>::new(
      store.clone(),
      Arc::new(ExactPath),
      ExistingAggregationProvider::new(store.clone(), Arc::new(ExactPath), LinkHandler::new(store.clone(), groups)),
      Arc::new(group_factory),
    )
    .with_listener(Arc::new(RaiseStatusListener::new(store.clone())))
    .with_listener(Arc::new(RaiseAncestorStatusListener::new(store.clone())));

    Ok(Self {
      manual: ManualChangeHandler::new(store.clone(), topology.clone()),
      exporter: StatusExporter::new(store.clone(), topology, config.event_visibility_period()),
      store,
      api,
      parsers,
      incidents,
      events,
      manual_source,
    })
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Runs one pass at `cursor`.
  ///
  /// Any failure other than an incident missing upstream aborts the pass.
  /// Every write is an idempotent upsert, so the next pass picks up where
  /// this one stopped.
  pub async fn run_pass(&self, cursor: DateTime<Utc>) -> Result<PassOutput> {
    let mut summary = PassSummary::default();

    self.ingest_incidents(&mut summary).await?;
    self.apply_manual_changes(&mut summary).await?;
    summary.events_closed = self.events.update_all_active(cursor).await?;
    write_cursor(self.store.as_ref(), STATUS_CURSOR, cursor).await?;
    let status = self.exporter.export(cursor).await?;

    tracing::info!(
      %cursor,
      incidents_listed = summary.incidents_listed,
      incidents_created = summary.incidents_created,
      manual_changes = summary.manual_changes,
      manual_changes_skipped = summary.manual_changes_skipped,
      events_closed = summary.events_closed,
      "pass complete"
    );
    Ok(PassOutput { summary, status })
  }

  async fn ingest_incidents(&self, summary: &mut PassSummary) -> Result<()> {
    let since = read_cursor(self.store.as_ref(), INCIDENTS_CURSOR).await?;
    let mut listed = self.api.list_incidents(since).await?;
    listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    summary.incidents_listed = listed.len();

    for incident in &listed {
      for parsed in parse_all(&self.parsers, incident) {
        let key = IncidentEntity::row_key_for(&parsed.id, &parsed.affected_component_path);
        if self.store.get::<IncidentEntity>(&key).await?.is_some() {
          tracing::debug!(incident = %parsed.id, path = %parsed.affected_component_path, "already ingested");
          continue;
        }
        self.incidents.create(&parsed).await?;
        summary.incidents_created += 1;
      }
    }

    if let Some(newest) = listed.iter().map(|i| i.created_at).max() {
      write_cursor(self.store.as_ref(), INCIDENTS_CURSOR, newest).await?;
    }
    Ok(())
  }

  async fn apply_manual_changes(&self, summary: &mut PassSummary) -> Result<()> {
    let since = read_cursor(self.store.as_ref(), MANUAL_CURSOR).await?;
    let changes = self.manual_source.changes_since(since).await?;
    for entry in &changes {
      match self.manual.apply(entry).await {
        Ok(()) => summary.manual_changes += 1,
        // Retrying cannot make a missing target appear.
        Err(AggregatorError::NotFound { partition, row_key }) => {
          tracing::warn!(
            timestamp = %entry.timestamp,
            %partition,
            %row_key,
            "manual change targets an unknown row, skipping"
          );
          summary.manual_changes_skipped += 1;
        }
        Err(e) => return Err(e),
      }
    }

    if let Some(newest) = changes.iter().map(|c| c.timestamp).max() {
      write_cursor(self.store.as_ref(), MANUAL_CURSOR, newest).await?;
    }
    Ok(())
  }
}
