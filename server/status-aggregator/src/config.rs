//! Aggregator configuration with sane defaults.
//!
//! Loaded from an optional TOML file, then overridden by `STATUS_*`
//! environment variables.

use std::net::{IpAddr, Ipv4Addr};

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use crate::component::Component;
use crate::parse::ParserConfig;

/// Tunables for aggregation, messaging and export.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Minutes an event must stay active before its Start message is posted.
  #[serde(default = "default_start_delay")]
  pub event_start_message_delay_minutes: i64,
  /// Grace period before an aggregation with no live children is closed.
  #[serde(default = "default_end_delay")]
  pub event_end_delay_minutes: i64,
  /// Days a closed event stays in the public timeline.
  #[serde(default = "default_visibility")]
  pub event_visibility_period_days: i64,
  #[serde(default)]
  pub parsers: Vec<ParserConfig>,
  #[serde(default = "default_topology")]
  pub topology: Component,
  #[serde(default)]
  pub logging: LoggingConfig,
  #[serde(default)]
  pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Filter directive, e.g. "info" or "status_aggregator=debug,info".
  #[serde(default = "default_log_level")]
  pub level: String,
  #[serde(default)]
  pub json: bool,
}

/// Settings for the long-running status service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host: IpAddr,
  #[serde(default = "default_port")]
  pub port: u16,
  #[serde(default = "default_pass_interval")]
  pub pass_interval_seconds: u64,
}

fn default_start_delay() -> i64 {
  15
}

fn default_end_delay() -> i64 {
  15
}

fn default_visibility() -> i64 {
  10
}

fn default_topology() -> Component {
  Component::new("Service")
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_host() -> IpAddr {
  IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
  5005
}

fn default_pass_interval() -> u64 {
  60
}

impl Default for Config {
  fn default() -> Self {
    Self {
      event_start_message_delay_minutes: default_start_delay(),
      event_end_delay_minutes: default_end_delay(),
      event_visibility_period_days: default_visibility(),
      parsers: Vec::new(),
      topology: default_topology(),
      logging: LoggingConfig::default(),
      server: ServerConfig::default(),
    }
  }
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      json: false,
    }
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
      pass_interval_seconds: default_pass_interval(),
    }
  }
}

impl Config {
  pub fn event_start_message_delay(&self) -> Duration {
    Duration::minutes(self.event_start_message_delay_minutes)
  }

  pub fn event_end_delay(&self) -> Duration {
    Duration::minutes(self.event_end_delay_minutes)
  }

  pub fn event_visibility_period(&self) -> Duration {
    Duration::days(self.event_visibility_period_days)
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file: {0}")]
  FileRead(#[from] std::io::Error),

  #[error("failed to parse config file: {0}")]
  Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `STATUS_EVENT_START_MESSAGE_DELAY_MINUTES`
/// - `STATUS_EVENT_END_DELAY_MINUTES`
/// - `STATUS_EVENT_VISIBILITY_PERIOD_DAYS`
/// - `STATUS_LOG_LEVEL`, `STATUS_LOG_JSON`
/// - `STATUS_HOST`, `STATUS_PORT`, `STATUS_PASS_INTERVAL_SECONDS`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
  let mut config = match path {
    Some(p) => match std::fs::read_to_string(p) {
      Ok(contents) => toml::from_str(&contents)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        tracing::info!(path = p, "config file not found, using defaults");
        Config::default()
      }
      Err(e) => return Err(ConfigError::FileRead(e)),
    },
    None => Config::default(),
  };

  apply_env_overrides(&mut config, |key| std::env::var(key).ok());
  Ok(config)
}

/// Applies `STATUS_*` overrides read through `var`. Unparseable values are ignored.
fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
  if let Some(v) = var("STATUS_EVENT_START_MESSAGE_DELAY_MINUTES").and_then(|v| v.parse().ok()) {
    config.event_start_message_delay_minutes = v;
  }
  if let Some(v) = var("STATUS_EVENT_END_DELAY_MINUTES").and_then(|v| v.parse().ok()) {
    config.event_end_delay_minutes = v;
  }
  if let Some(v) = var("STATUS_EVENT_VISIBILITY_PERIOD_DAYS").and_then(|v| v.parse().ok()) {
    config.event_visibility_period_days = v;
  }
  if let Some(level) = var("STATUS_LOG_LEVEL") {
    config.logging.level = level;
  }
  if let Some(json) = var("STATUS_LOG_JSON") {
    config.logging.json = json == "true" || json == "1";
  }
  if let Some(host) = var("STATUS_HOST").and_then(|v| v.parse().ok()) {
    config.server.host = host;
  }
  if let Some(port) = var("STATUS_PORT").and_then(|v| v.parse().ok()) {
    config.server.port = port;
  }
  if let Some(secs) = var("STATUS_PASS_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
    config.server.pass_interval_seconds = secs;
  }
}
