//! In-memory row store.
//!
//! Rows are kept as serialized JSON values keyed by `(partition, row_key)`,
//! so callers always work on their own copy of an entity and a write only
//! becomes visible once it is persisted, as with a remote table.
//!
//! Not durable: all state is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{Filter, Store};
use crate::entity::Entity;
use crate::error::{AggregatorError, Result};

type RowId = (&'static str, String);

#[derive(Debug, Default)]
pub struct InMemoryStore {
  rows: RwLock<BTreeMap<RowId, Value>>,
}

fn poison_err<T>(_: PoisonError<T>) -> AggregatorError {
  AggregatorError::store("lock poisoned")
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of rows in the given partition.
  pub fn count(&self, partition: &str) -> Result<usize> {
    let rows = self.rows.read().map_err(poison_err)?;
    Ok(rows.keys().filter(|(p, _)| *p == partition).count())
  }
}

#[async_trait]
impl Store for InMemoryStore {
  async fn query<T: Entity>(&self, filter: Filter<'_, T>) -> Result<Vec<T>> {
    let snapshot: Vec<Value> = {
      let rows = self.rows.read().map_err(poison_err)?;
      rows
        .iter()
        .filter(|((partition, _), _)| *partition == T::PARTITION)
        .map(|(_, value)| value.clone())
        .collect()
    };

    let mut out = Vec::new();
    for value in snapshot {
      let entity: T = serde_json::from_value(value)?;
      if filter(&entity) {
        out.push(entity);
      }
    }
    Ok(out)
  }

  async fn get<T: Entity>(&self, row_key: &str) -> Result<Option<T>> {
    let value = {
      let rows = self.rows.read().map_err(poison_err)?;
      rows.get(&(T::PARTITION, row_key.to_string())).cloned()
    };
    match value {
      Some(v) => Ok(Some(serde_json::from_value(v)?)),
      None => Ok(None),
    }
  }

  async fn insert_or_replace<T: Entity>(&self, entity: &T) -> Result<()> {
    let value = serde_json::to_value(entity)?;
    let mut rows = self.rows.write().map_err(poison_err)?;
    rows.insert((T::PARTITION, entity.row_key().to_string()), value);
    Ok(())
  }

  async fn replace<T: Entity>(&self, entity: &T) -> Result<()> {
    let value = serde_json::to_value(entity)?;
    let mut rows = self.rows.write().map_err(poison_err)?;
    match rows.get_mut(&(T::PARTITION, entity.row_key().to_string())) {
      Some(row) => {
        *row = value;
        Ok(())
      }
      None => Err(AggregatorError::not_found(T::PARTITION, entity.row_key())),
    }
  }
}
