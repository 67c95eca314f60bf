//! Link parsed incidents into Incident -> IncidentGroup -> Event chains.
//!
//! For each level the factory first looks for an existing parent the input
//! can join; only when none accepts it does it create a new parent, which
//! cascades upward (a new group may need a new event).

use std::sync::Arc;

use async_trait::async_trait;

use crate::component::path_prefix;
use crate::entity::{Aggregated, Aggregation, ComponentAffecting, Entity, EventEntity};
use crate::error::{AggregatorError, Result};
use crate::incident::ParsedIncident;
use crate::store::{self, Store};
use crate::update::EntityUpdater;

/// Number of leading path segments an event covers, e.g. `Service/Api`.
pub const EVENT_PATH_DEPTH: usize = 2;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Computes the path an aggregation level covers for an input.
pub trait PathProvider: Send + Sync {
  fn path(&self, input: &ParsedIncident) -> String;
}

/// The input's own path (incidents and groups).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactPath;

impl PathProvider for ExactPath {
  fn path(&self, input: &ParsedIncident) -> String {
    input.affected_component_path.clone()
  }
}

/// The input's path truncated to `depth` segments (events).
#[derive(Debug, Clone, Copy)]
pub struct PrefixPath {
  pub depth: usize,
}

impl Default for PrefixPath {
  fn default() -> Self {
    Self {
      depth: EVENT_PATH_DEPTH,
    }
  }
}

impl PathProvider for PrefixPath {
  fn path(&self, input: &ParsedIncident) -> String {
    path_prefix(&input.affected_component_path, self.depth)
  }
}

// ---------------------------------------------------------------------------
// Linking
// ---------------------------------------------------------------------------

/// Decides whether an input may join an existing aggregation.
pub struct LinkHandler<S, A: Aggregation> {
  store: Arc<S>,
  updater: Arc<dyn EntityUpdater<A>>,
}

impl<S: Store, A: Aggregation> LinkHandler<S, A> {
  pub fn new(store: Arc<S>, updater: Arc<dyn EntityUpdater<A>>) -> Self {
    Self { store, updater }
  }

  /// Aggregations without children were authored by hand and never extended
  /// automatically. Otherwise the candidate is brought up to date as of the
  /// input's start, and accepted only if it is still active.
  pub async fn can_link(&self, input: &ParsedIncident, candidate: &mut A) -> Result<bool> {
    let linked = store::children::<A::Child, _>(self.store.as_ref(), &*candidate).await?;
    if linked.is_empty() {
      tracing::debug!(
        kind = A::PARTITION,
        row_key = candidate.row_key(),
        "candidate has no linked children, not linking"
      );
      return Ok(false);
    }

    let inactive = self.updater.update(candidate, input.start_time).await?;
    if inactive {
      tracing::debug!(
        kind = A::PARTITION,
        row_key = candidate.row_key(),
        "candidate closed before input started, not linking"
      );
    }
    Ok(!inactive)
  }
}

/// Finds an existing aggregation an input can join.
pub struct ExistingAggregationProvider<S, A: Aggregation> {
  store: Arc<S>,
  paths: Arc<dyn PathProvider>,
  link_handler: LinkHandler<S, A>,
}

impl<S: Store, A: Aggregation> ExistingAggregationProvider<S, A> {
  pub fn new(store: Arc<S>, paths: Arc<dyn PathProvider>, link_handler: LinkHandler<S, A>) -> Self {
    Self {
      store,
      paths,
      link_handler,
    }
  }

  /// First candidate on the input's path that was alive when the input
  /// started (or ended no earlier than that) and accepts the link.
  pub async fn find(&self, input: &ParsedIncident) -> Result<Option<A>> {
    let path = self.paths.path(input);
    let start = input.start_time;
    let candidates = self
      .store
      .query::<A>(&|a: &A| {
        a.affected_path() == path
          && a.start_time() <= start
          && a.end_time().map_or(true, |end| end >= start)
      })
      .await?;

    for mut candidate in candidates {
      if self.link_handler.can_link(input, &mut candidate).await? {
        return Ok(Some(candidate));
      }
    }
    Ok(None)
  }
}

/// Reacts to a child being linked to a parent.
///
/// May mutate and persist the parent. Errors propagate to the caller.
#[async_trait]
pub trait LinkListener<P, C>: Send + Sync {
  async fn on_linked(&self, parent: &mut P, child: &C) -> Result<()>;
}

/// Raises the parent's status to the child's when the child is more severe.
pub struct RaiseStatusListener<S> {
  store: Arc<S>,
}

impl<S: Store> RaiseStatusListener<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }
}

#[async_trait]
impl<S, P, C> LinkListener<P, C> for RaiseStatusListener<S>
where
  S: Store,
  P: ComponentAffecting,
  C: ComponentAffecting,
{
  async fn on_linked(&self, parent: &mut P, child: &C) -> Result<()> {
    if parent.fields_mut().raise_status(child.status()) {
      self.store.replace(&*parent).await?;
      tracing::info!(
        kind = P::PARTITION,
        row_key = parent.row_key(),
        status = ?parent.status(),
        "raised aggregation status"
      );
    }
    Ok(())
  }
}

/// Carries the parent's status one level further up, so an event never
/// reports less than any of its groups.
///
/// Register after [`RaiseStatusListener`] on the factory whose parent is
/// itself aggregated.
pub struct RaiseAncestorStatusListener<S> {
  store: Arc<S>,
}

impl<S: Store> RaiseAncestorStatusListener<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }
}

#[async_trait]
impl<S, P, C> LinkListener<P, C> for RaiseAncestorStatusListener<S>
where
  S: Store,
  P: Aggregated,
  C: ComponentAffecting,
{
  async fn on_linked(&self, parent: &mut P, _child: &C) -> Result<()> {
    let key = parent.parent_row_key();
    let mut ancestor = self
      .store
      .get::<P::Parent>(key)
      .await?
      .ok_or_else(|| AggregatorError::not_found(<P::Parent as Entity>::PARTITION, key))?;
    if ancestor.fields_mut().raise_status(parent.status()) {
      self.store.replace(&ancestor).await?;
      tracing::info!(
        kind = <P::Parent as Entity>::PARTITION,
        row_key = ancestor.row_key(),
        status = ?ancestor.status(),
        "raised ancestor status"
      );
    }
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Creates and persists an entity of kind `T` for a parsed incident.
#[async_trait]
pub trait EntityFactory<T>: Send + Sync {
  async fn create(&self, input: &ParsedIncident) -> Result<T>;
}

/// Creates top-level events.
pub struct EventFactory<S> {
  store: Arc<S>,
  paths: Arc<dyn PathProvider>,
}

impl<S: Store> EventFactory<S> {
  pub fn new(store: Arc<S>, paths: Arc<dyn PathProvider>) -> Self {
    Self { store, paths }
  }
}

#[async_trait]
impl<S: Store> EntityFactory<EventEntity> for EventFactory<S> {
  async fn create(&self, input: &ParsedIncident) -> Result<EventEntity> {
    let path = self.paths.path(input);
    let event = EventEntity::new(&path, input.affected_component_status, input.start_time, &input.id);
    self.store.insert_or_replace(&event).await?;
    tracing::info!(row_key = %event.fields.row_key, path = %path, "created event");
    Ok(event)
  }
}

/// Creates an entity linked to an existing or newly created parent.
pub struct AggregatedFactory<S, C>
where
  C: Aggregated,
  C::Parent: Aggregation,
{
  store: Arc<S>,
  paths: Arc<dyn PathProvider>,
  existing: ExistingAggregationProvider<S, C::Parent>,
  parent_factory: Arc<dyn EntityFactory<C::Parent>>,
  listeners: Vec<Arc<dyn LinkListener<C::Parent, C>>>,
}

impl<S, C> AggregatedFactory<S, C>
where
  S: Store,
  C: Aggregated,
  C::Parent: Aggregation,
{
  pub fn new(
    store: Arc<S>,
    paths: Arc<dyn PathProvider>,
    existing: ExistingAggregationProvider<S, C::Parent>,
    parent_factory: Arc<dyn EntityFactory<C::Parent>>,
  ) -> Self {
    Self {
      store,
      paths,
      existing,
      parent_factory,
      listeners: Vec::new(),
    }
  }

  /// Registers a link listener; listeners run in registration order.
  pub fn with_listener(mut self, listener: Arc<dyn LinkListener<C::Parent, C>>) -> Self {
    self.listeners.push(listener);
    self
  }
}

#[async_trait]
impl<S, C> EntityFactory<C> for AggregatedFactory<S, C>
where
  S: Store,
  C: Aggregated,
  C::Parent: Aggregation,
{
  async fn create(&self, input: &ParsedIncident) -> Result<C> {
    let mut parent = match self.existing.find(input).await? {
      Some(parent) => {
        tracing::debug!(
          kind = <C::Parent as Entity>::PARTITION,
          row_key = parent.row_key(),
          incident = %input.id,
          "linking to existing aggregation"
        );
        parent
      }
      None => self.parent_factory.create(input).await?,
    };

    let child = C::link(&parent, input, self.paths.path(input));
    self.store.insert_or_replace(&child).await?;
    tracing::info!(
      kind = C::PARTITION,
      row_key = child.row_key(),
      parent = parent.row_key(),
      path = child.affected_path(),
      "created linked entity"
    );

    for listener in &self.listeners {
      listener.on_linked(&mut parent, &child).await?;
    }
    Ok(child)
  }
}
