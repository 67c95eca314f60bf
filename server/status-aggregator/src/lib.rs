//! Status Aggregation Engine.
//!
//! Turns incidents reported by an incident-tracking system into public
//! status: incidents are linked into incident groups and events, events
//! are closed bottom-up once their incidents are mitigated (after a grace
//! delay), each event carries a narrative message log, and every pass
//! exports a component tree plus an event timeline as JSON.
//!
//! Storage is behind the [`Store`] trait; [`InMemoryStore`] ships with the
//! crate.

pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod export;
pub mod factory;
pub mod incident;
pub mod logging;
pub mod manual;
pub mod messaging;
pub mod parse;
pub mod status_updater;
pub mod store;
pub mod update;

pub use component::{Component, ComponentFactory, ComponentKind};
pub use config::{load_config, Config};
pub use entity::ComponentStatus;
pub use error::{AggregatorError, Result};
pub use export::ServiceStatus;
pub use incident::{Incident, IncidentApi, RecordedIncidentApi};
pub use manual::{ManualStatusChange, ManualStatusChangeEntry, RecordedManualChanges};
pub use status_updater::{PassOutput, PassSummary, StatusUpdater};
pub use store::{InMemoryStore, Store};
