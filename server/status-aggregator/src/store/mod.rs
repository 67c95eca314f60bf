//! Entity store contract.
//!
//! The store is row-oriented: every entity lives under its kind's partition
//! and is addressed by row key. Writes are per-row upserts with
//! last-writer-wins semantics; there are no cross-row transactions, so the
//! pipeline assumes a single writer per pass.

pub mod memory;

use async_trait::async_trait;

use crate::entity::{Aggregated, ComponentAffecting, Entity, EventEntity, MessageEntity};
use crate::error::Result;

pub use memory::InMemoryStore;

/// Row predicate passed to [`Store::query`].
pub type Filter<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// Persistence for aggregation entities.
#[async_trait]
pub trait Store: Send + Sync {
  /// Returns every row of `T` matching `filter`, in row-key order.
  async fn query<T: Entity>(&self, filter: Filter<'_, T>) -> Result<Vec<T>>;

  /// Returns one row of `T`, if present.
  async fn get<T: Entity>(&self, row_key: &str) -> Result<Option<T>>;

  /// Inserts the row, or replaces it when the row key already exists.
  async fn insert_or_replace<T: Entity>(&self, entity: &T) -> Result<()>;

  /// Replaces an existing row.
  ///
  /// # Errors
  ///
  /// Returns `AggregatorError::NotFound` when the row does not exist.
  async fn replace<T: Entity>(&self, entity: &T) -> Result<()>;
}

/// All active entities of kind `T`.
pub async fn active<T, S>(store: &S) -> Result<Vec<T>>
where
  T: ComponentAffecting,
  S: Store + ?Sized,
{
  store.query::<T>(&|e: &T| e.is_active()).await
}

/// All children of kind `C` linked to `parent`.
pub async fn children<C, S>(store: &S, parent: &C::Parent) -> Result<Vec<C>>
where
  C: Aggregated,
  S: Store + ?Sized,
{
  let parent_key = parent.row_key().to_string();
  store
    .query::<C>(&move |c: &C| c.parent_row_key() == parent_key)
    .await
}

/// Every message in `event`'s narrative, ordered by time.
pub async fn messages_for<S>(store: &S, event: &EventEntity) -> Result<Vec<MessageEntity>>
where
  S: Store + ?Sized,
{
  let event_key = event.row_key().to_string();
  let mut messages = store
    .query::<MessageEntity>(&move |m: &MessageEntity| m.event_row_key == event_key)
    .await?;
  messages.sort_by(|a, b| a.time.cmp(&b.time));
  Ok(messages)
}
