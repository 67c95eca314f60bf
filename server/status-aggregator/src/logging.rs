//! Tracing subscriber setup shared by the binaries.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global subscriber. Logs go to stderr so stdout stays free
/// for JSON output. An invalid filter directive falls back to `info`.
pub fn init(config: &LoggingConfig) {
  let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr);
  if config.json {
    builder.json().init();
  } else {
    builder.init();
  }
}
