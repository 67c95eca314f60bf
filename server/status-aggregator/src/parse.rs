//! Map raw incidents onto component paths.
//!
//! Each parser matches incident titles against a regex and fills a path
//! template from the named captures, e.g. pattern
//! `^Outage in (?P<region>\w+) \((?P<environment>\w+)\)$` with template
//! `Service/Regions/{region}`.

use regex::Regex;
use serde::Deserialize;

use crate::entity::ComponentStatus;
use crate::error::{AggregatorError, Result};
use crate::incident::{Incident, ParsedIncident};

const ENVIRONMENT_GROUP: &str = "environment";

/// Turns an incident into a parsed incident, or declines it.
pub trait IncidentParser: Send + Sync {
  /// Label used in logs.
  fn name(&self) -> &str;

  fn parse(&self, incident: &Incident) -> Option<ParsedIncident>;
}

/// Configuration for one [`RegexIncidentParser`].
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
  pub name: String,
  pub title_pattern: String,
  /// Path with `{group}` placeholders filled from the pattern's captures.
  pub path_template: String,
  /// Incidents less severe than this (numerically greater) are ignored.
  #[serde(default = "default_max_severity")]
  pub max_severity: u8,
  /// Accepted values of the `environment` capture. Empty accepts all.
  #[serde(default)]
  pub environments: Vec<String>,
}

fn default_max_severity() -> u8 {
  2
}

#[derive(Debug, Clone)]
pub struct RegexIncidentParser {
  name: String,
  pattern: Regex,
  path_template: String,
  max_severity: u8,
  environments: Vec<String>,
}

impl RegexIncidentParser {
  pub fn new(config: &ParserConfig) -> Result<Self> {
    let pattern = Regex::new(&config.title_pattern)
      .map_err(|e| AggregatorError::parser(&config.name, e.to_string()))?;

    // Every placeholder must name a capture group, or paths would keep raw `{..}`.
    for placeholder in placeholders(&config.path_template) {
      if !pattern.capture_names().flatten().any(|n| n == placeholder) {
        return Err(AggregatorError::parser(
          &config.name,
          format!("path template references unknown group {}", placeholder),
        ));
      }
    }

    Ok(Self {
      name: config.name.clone(),
      pattern,
      path_template: config.path_template.clone(),
      max_severity: config.max_severity,
      environments: config
        .environments
        .iter()
        .map(|e| e.to_ascii_lowercase())
        .collect(),
    })
  }
}

impl IncidentParser for RegexIncidentParser {
  fn name(&self) -> &str {
    &self.name
  }

  fn parse(&self, incident: &Incident) -> Option<ParsedIncident> {
    if incident.severity > self.max_severity {
      tracing::debug!(parser = %self.name, id = %incident.id, severity = incident.severity, "severity filtered");
      return None;
    }

    let captures = self.pattern.captures(&incident.title)?;

    if !self.environments.is_empty() {
      if let Some(env) = captures.name(ENVIRONMENT_GROUP) {
        let env = env.as_str().to_ascii_lowercase();
        if !self.environments.contains(&env) {
          tracing::debug!(parser = %self.name, id = %incident.id, environment = %env, "environment filtered");
          return None;
        }
      }
    }

    let mut path = self.path_template.clone();
    for name in self.pattern.capture_names().flatten() {
      if let Some(value) = captures.name(name) {
        path = path.replace(&format!("{{{}}}", name), value.as_str());
      }
    }

    Some(ParsedIncident {
      id: incident.id.clone(),
      affected_component_path: path,
      affected_component_status: status_for_severity(incident.severity),
      start_time: incident.created_at,
      end_time: incident.mitigated_at,
    })
  }
}

/// Severity 1 takes a component down; anything milder degrades it.
pub fn status_for_severity(severity: u8) -> ComponentStatus {
  if severity <= 1 {
    ComponentStatus::Down
  } else {
    ComponentStatus::Degraded
  }
}

/// Runs every parser over an incident. One incident may affect several paths.
pub fn parse_all(parsers: &[Box<dyn IncidentParser>], incident: &Incident) -> Vec<ParsedIncident> {
  parsers
    .iter()
    .filter_map(|p| {
      let parsed = p.parse(incident)?;
      tracing::debug!(
        parser = p.name(),
        id = %incident.id,
        path = %parsed.affected_component_path,
        "incident matched"
      );
      Some(parsed)
    })
    .collect()
}

fn placeholders(template: &str) -> Vec<&str> {
  let mut out = Vec::new();
  let mut rest = template;
  while let Some(open) = rest.find('{') {
    let Some(close) = rest[open..].find('}') else {
      break;
    };
    out.push(&rest[open + 1..open + close]);
    rest = &rest[open + close + 1..];
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  fn config() -> ParserConfig {
    ParserConfig {
      name: "regional-outage".into(),
      title_pattern: r"^Outage in (?P<region>\w+) \((?P<environment>\w+)\)$".into(),
      path_template: "Service/Regions/{region}".into(),
      max_severity: 2,
      environments: vec!["PROD".into()],
    }
  }

  fn incident(title: &str, severity: u8) -> Incident {
    Incident {
      id: "42".into(),
      title: title.into(),
      severity,
      created_at: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
      mitigated_at: None,
    }
  }

  #[test]
  fn parses_path_and_status() {
    let parser = RegexIncidentParser::new(&config()).unwrap();
    let parsed = parser.parse(&incident("Outage in East (prod)", 1)).unwrap();
    assert_eq!(parsed.affected_component_path, "Service/Regions/East");
    assert_eq!(parsed.affected_component_status, ComponentStatus::Down);
    assert_eq!(parsed.id, "42");

    let degraded = parser.parse(&incident("Outage in West (prod)", 2)).unwrap();
    assert_eq!(degraded.affected_component_status, ComponentStatus::Degraded);
  }

  #[test]
  fn filters_by_severity_and_environment() {
    let parser = RegexIncidentParser::new(&config()).unwrap();
    assert!(parser.parse(&incident("Outage in East (prod)", 3)).is_none());
    assert!(parser.parse(&incident("Outage in East (dev)", 1)).is_none());
    assert!(parser.parse(&incident("Something else", 1)).is_none());
  }

  #[test]
  fn rejects_bad_configs() {
    let mut bad_regex = config();
    bad_regex.title_pattern = "(".into();
    assert!(RegexIncidentParser::new(&bad_regex).is_err());

    let mut bad_template = config();
    bad_template.path_template = "Service/{zone}".into();
    let err = RegexIncidentParser::new(&bad_template).unwrap_err();
    assert!(err.to_string().contains("zone"));
  }

  #[test]
  fn parse_all_collects_every_match() {
    let mut api = config();
    api.name = "api".into();
    api.path_template = "Service/Api".into();
    let parsers: Vec<Box<dyn IncidentParser>> = vec![
      Box::new(RegexIncidentParser::new(&config()).unwrap()),
      Box::new(RegexIncidentParser::new(&api).unwrap()),
    ];
    let names: Vec<_> = parsers.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["regional-outage", "api"]);

    let parsed = parse_all(&parsers, &incident("Outage in East (prod)", 1));
    let paths: Vec<_> = parsed.iter().map(|p| p.affected_component_path.as_str()).collect();
    assert_eq!(paths, vec!["Service/Regions/East", "Service/Api"]);
  }
}
