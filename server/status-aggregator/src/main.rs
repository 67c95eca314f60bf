//! Binary entrypoint: read incidents as JSON lines from stdin, run one pass,
//! write the resulting service status as JSON to stdout.
//!
//! Usage: `status-aggregator [--config PATH] [--cursor RFC3339]`
//!
//! Blank lines are skipped; lines that are not a valid incident are logged
//! and skipped. The pass cursor defaults to now.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use status_aggregator::{
  load_config, logging, Incident, InMemoryStore, RecordedIncidentApi, RecordedManualChanges,
  StatusUpdater,
};

struct Args {
  config: Option<String>,
  cursor: Option<DateTime<Utc>>,
}

fn parse_args() -> Result<Args, String> {
  let mut args = Args {
    config: None,
    cursor: None,
  };
  let mut iter = std::env::args().skip(1);
  while let Some(flag) = iter.next() {
    let value = iter
      .next()
      .ok_or_else(|| format!("missing value for {}", flag))?;
    match flag.as_str() {
      "--config" => args.config = Some(value),
      "--cursor" => {
        let parsed = DateTime::parse_from_rfc3339(&value)
          .map_err(|e| format!("invalid --cursor {}: {}", value, e))?;
        args.cursor = Some(parsed.with_timezone(&Utc));
      }
      other => return Err(format!("unknown argument {}", other)),
    }
  }
  Ok(args)
}

#[tokio::main]
async fn main() -> ExitCode {
  let args = match parse_args() {
    Ok(a) => a,
    Err(e) => {
      let _ = writeln!(io::stderr(), "status-aggregator: {}", e);
      return ExitCode::from(2);
    }
  };

  let config = match load_config(args.config.as_deref()) {
    Ok(c) => c,
    Err(e) => {
      let _ = writeln!(io::stderr(), "status-aggregator: {}", e);
      return ExitCode::FAILURE;
    }
  };
  logging::init(&config.logging);

  let api = Arc::new(RecordedIncidentApi::new());
  let stdin = io::stdin();
  for (number, line) in stdin.lock().lines().enumerate() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        tracing::error!(error = %e, "failed to read stdin");
        return ExitCode::FAILURE;
      }
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let incident: Incident = match serde_json::from_str(trimmed) {
      Ok(i) => i,
      Err(e) => {
        tracing::warn!(line = number + 1, error = %e, "skipping invalid incident");
        continue;
      }
    };
    if let Err(e) = api.record(incident) {
      tracing::error!(error = %e, "failed to record incident");
      return ExitCode::FAILURE;
    }
  }

  let store = Arc::new(InMemoryStore::new());
  let updater = match StatusUpdater::new(store, api, Arc::new(RecordedManualChanges::new()), &config) {
    Ok(u) => u,
    Err(e) => {
      tracing::error!(error = %e, "invalid configuration");
      return ExitCode::FAILURE;
    }
  };

  let cursor = args.cursor.unwrap_or_else(Utc::now);
  let output = match updater.run_pass(cursor).await {
    Ok(o) => o,
    Err(e) => {
      tracing::error!(error = %e, "pass failed");
      return ExitCode::FAILURE;
    }
  };

  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());
  if let Err(e) = serde_json::to_writer(&mut out, &output.status) {
    tracing::error!(error = %e, "failed to write status");
    return ExitCode::FAILURE;
  }
  let _ = writeln!(out);
  let _ = out.flush();
  ExitCode::SUCCESS
}
