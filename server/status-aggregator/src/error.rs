//! Structured error types for the status aggregator.

use thiserror::Error;

use crate::incident::IncidentApiError;

/// The result type used throughout the aggregator.
pub type Result<T> = std::result::Result<T, AggregatorError>;

#[derive(Debug, Error)]
pub enum AggregatorError {
  #[error("store: {message}")]
  Store { message: String },

  #[error("not found: {partition}/{row_key}")]
  NotFound { partition: String, row_key: String },

  #[error("incident api: {0}")]
  IncidentApi(#[from] IncidentApiError),

  #[error("parser {name}: {reason}")]
  Parser { name: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl AggregatorError {
  pub fn store(message: impl Into<String>) -> Self {
    Self::Store {
      message: message.into(),
    }
  }

  pub fn not_found(partition: &str, row_key: &str) -> Self {
    Self::NotFound {
      partition: partition.to_string(),
      row_key: row_key.to_string(),
    }
  }

  pub fn parser(name: &str, reason: impl Into<String>) -> Self {
    Self::Parser {
      name: name.to_string(),
      reason: reason.into(),
    }
  }
}
