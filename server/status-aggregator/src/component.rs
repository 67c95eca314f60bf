//! Component topology: the static tree that statuses are projected onto.
//!
//! Paths are `/`-delimited and start with the root's name, e.g.
//! `"Service/Api/Search"`.

use serde::{Deserialize, Serialize};

use crate::entity::ComponentStatus;

pub const PATH_SEPARATOR: char = '/';

/// Joins path segments with [`PATH_SEPARATOR`].
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
  segments
    .iter()
    .map(|s| s.as_ref())
    .collect::<Vec<_>>()
    .join("/")
}

/// First `depth` segments of `path` (the whole path when it is shorter).
pub fn path_prefix(path: &str, depth: usize) -> String {
  let segments: Vec<&str> = path.split(PATH_SEPARATOR).take(depth).collect();
  join_path(&segments)
}

/// How a component derives its status from its subcomponents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
  /// Worst status among itself and its subcomponents.
  #[default]
  Tree,
  /// Redundant instances serving together: one failure only degrades.
  ActiveActive,
  /// First subcomponent is primary, the rest are standbys.
  ActivePassive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub kind: ComponentKind,
  /// Status applied directly to this component (not rolled up).
  #[serde(default)]
  pub status: ComponentStatus,
  #[serde(default)]
  pub subcomponents: Vec<Component>,
}

impl Component {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: String::new(),
      kind: ComponentKind::Tree,
      status: ComponentStatus::Up,
      subcomponents: Vec::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn with_kind(mut self, kind: ComponentKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_subcomponent(mut self, sub: Component) -> Self {
    self.subcomponents.push(sub);
    self
  }

  /// Resolves a full path (root name first) to a component in this tree.
  pub fn get_by_path(&self, path: &str) -> Option<&Component> {
    let mut segments = path.split(PATH_SEPARATOR);
    if segments.next()? != self.name {
      return None;
    }
    let mut current = self;
    for segment in segments {
      current = current.subcomponents.iter().find(|c| c.name == segment)?;
    }
    Some(current)
  }

  pub fn get_by_path_mut(&mut self, path: &str) -> Option<&mut Component> {
    let mut segments = path.split(PATH_SEPARATOR);
    if segments.next()? != self.name {
      return None;
    }
    let mut current = self;
    for segment in segments {
      current = current
        .subcomponents
        .iter_mut()
        .find(|c| c.name == segment)?;
    }
    Some(current)
  }

  /// Raises this component's own status; the most severe status wins.
  pub fn apply_status(&mut self, status: ComponentStatus) {
    self.status = self.status.max(status);
  }

  /// Status after rolling up subcomponents according to [`ComponentKind`].
  pub fn effective_status(&self) -> ComponentStatus {
    if self.subcomponents.is_empty() {
      return self.status;
    }

    let subs: Vec<ComponentStatus> = self
      .subcomponents
      .iter()
      .map(Component::effective_status)
      .collect();

    let rolled = match self.kind {
      ComponentKind::Tree => subs.iter().copied().max().unwrap_or_default(),
      ComponentKind::ActiveActive => {
        if subs.iter().all(|s| *s == ComponentStatus::Down) {
          ComponentStatus::Down
        } else if subs.iter().any(|s| *s != ComponentStatus::Up) {
          ComponentStatus::Degraded
        } else {
          ComponentStatus::Up
        }
      }
      ComponentKind::ActivePassive => {
        let primary = subs[0];
        if primary == ComponentStatus::Up {
          ComponentStatus::Up
        } else if subs[1..].iter().any(|s| *s == ComponentStatus::Up) {
          ComponentStatus::Degraded
        } else {
          primary
        }
      }
    };

    self.status.max(rolled)
  }

  fn reset(&mut self) {
    self.status = ComponentStatus::Up;
    for sub in &mut self.subcomponents {
      sub.reset();
    }
  }
}

/// Source of the static component topology.
pub trait ComponentFactory: Send + Sync {
  /// Builds a fresh tree with every component `Up`.
  fn create(&self) -> Component;
}

/// A configured tree serves as its own template.
impl ComponentFactory for Component {
  fn create(&self) -> Component {
    let mut root = self.clone();
    root.reset();
    root
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn topology() -> Component {
    Component::new("Service")
      .with_subcomponent(
        Component::new("Api")
          .with_subcomponent(Component::new("Search"))
          .with_subcomponent(Component::new("Publish")),
      )
      .with_subcomponent(
        Component::new("Regions")
          .with_kind(ComponentKind::ActiveActive)
          .with_subcomponent(Component::new("East"))
          .with_subcomponent(Component::new("West")),
      )
      .with_subcomponent(
        Component::new("Storage")
          .with_kind(ComponentKind::ActivePassive)
          .with_subcomponent(Component::new("Primary"))
          .with_subcomponent(Component::new("Secondary")),
      )
  }

  #[test]
  fn path_helpers() {
    assert_eq!(join_path(&["a", "b", "c"]), "a/b/c");
    assert_eq!(path_prefix("a/b/c/d", 2), "a/b");
    assert_eq!(path_prefix("a", 2), "a");
  }

  #[test]
  fn resolves_paths_from_root() {
    let root = topology();
    assert_eq!(root.get_by_path("Service").unwrap().name, "Service");
    assert_eq!(root.get_by_path("Service/Api/Search").unwrap().name, "Search");
    assert!(root.get_by_path("Service/Api/Missing").is_none());
    assert!(root.get_by_path("Other/Api").is_none());
  }

  #[test]
  fn tree_rolls_up_worst_status() {
    let mut root = topology();
    root
      .get_by_path_mut("Service/Api/Search")
      .unwrap()
      .apply_status(ComponentStatus::Down);
    assert_eq!(root.get_by_path("Service/Api").unwrap().effective_status(), ComponentStatus::Down);
    assert_eq!(root.effective_status(), ComponentStatus::Down);
  }

  #[test]
  fn apply_status_keeps_most_severe() {
    let mut c = Component::new("X");
    c.apply_status(ComponentStatus::Down);
    c.apply_status(ComponentStatus::Degraded);
    assert_eq!(c.status, ComponentStatus::Down);
  }

  #[test]
  fn active_active_degrades_until_all_down() {
    let mut root = topology();
    root
      .get_by_path_mut("Service/Regions/East")
      .unwrap()
      .apply_status(ComponentStatus::Down);
    let regions = root.get_by_path("Service/Regions").unwrap();
    assert_eq!(regions.effective_status(), ComponentStatus::Degraded);

    root
      .get_by_path_mut("Service/Regions/West")
      .unwrap()
      .apply_status(ComponentStatus::Down);
    let regions = root.get_by_path("Service/Regions").unwrap();
    assert_eq!(regions.effective_status(), ComponentStatus::Down);
  }

  #[test]
  fn active_passive_follows_primary() {
    let mut root = topology();
    root
      .get_by_path_mut("Service/Storage/Secondary")
      .unwrap()
      .apply_status(ComponentStatus::Down);
    assert_eq!(
      root.get_by_path("Service/Storage").unwrap().effective_status(),
      ComponentStatus::Up
    );

    root
      .get_by_path_mut("Service/Storage/Primary")
      .unwrap()
      .apply_status(ComponentStatus::Down);
    assert_eq!(
      root.get_by_path("Service/Storage").unwrap().effective_status(),
      ComponentStatus::Down
    );
  }

  #[test]
  fn factory_resets_statuses() {
    let mut template = topology();
    template
      .get_by_path_mut("Service/Api")
      .unwrap()
      .apply_status(ComponentStatus::Down);
    let fresh = template.create();
    assert_eq!(fresh.effective_status(), ComponentStatus::Up);
  }

  #[test]
  fn topology_deserializes_from_toml() {
    let raw = r#"
      name = "Service"
      [[subcomponents]]
      name = "Api"
      description = "calling the API"
      [[subcomponents]]
      name = "Regions"
      kind = "active_active"
    "#;
    let root: Component = toml::from_str(raw).unwrap();
    assert_eq!(root.subcomponents.len(), 2);
    assert_eq!(root.subcomponents[1].kind, ComponentKind::ActiveActive);
    assert_eq!(root.subcomponents[0].description, "calling the API");
  }
}
