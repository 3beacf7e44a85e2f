//! Compose project model.
//!
//! Models the slice of the compose file format this tool manipulates: service
//! image references, build instructions, and dependency edges. Every key the
//! model does not name rides through a flattened map so the generated manifest
//! keeps it intact.

pub mod loader;

pub use loader::{LoadError, LoadOptions, load};

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use thiserror::Error;

/// A compose project: named services plus any top-level sections the model
/// does not cover (volumes, networks, configs, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeProject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A single service entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    #[serde(default, skip_serializing_if = "DependsOn::is_empty")]
    pub depends_on: DependsOn,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ServiceConfig {
    /// Whether the service carries a non-empty image reference.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|image| !image.is_empty())
    }
}

/// Build instructions in either the `build: ./dir` shorthand or the long form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    Context(String),
    Detailed(BuildConfig),
}

impl BuildSpec {
    /// Normalizes both forms into a [`BuildConfig`].
    #[must_use]
    pub fn to_config(&self) -> BuildConfig {
        match self {
            Self::Context(path) => BuildConfig {
                context: path.clone(),
                ..BuildConfig::default()
            },
            Self::Detailed(config) => config.clone(),
        }
    }
}

/// Long-form build instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "KeyValueList::is_empty")]
    pub args: KeyValueList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "KeyValueList::is_empty")]
    pub labels: KeyValueList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_from: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_cache: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            context: default_context(),
            dockerfile: None,
            args: KeyValueList::default(),
            target: None,
            tags: Vec::new(),
            labels: KeyValueList::default(),
            cache_from: Vec::new(),
            no_cache: false,
            extra: BTreeMap::new(),
        }
    }
}

fn default_context() -> String {
    ".".to_string()
}

/// Key/value pairs accepted in both compose forms: a mapping with optional
/// values, or a `KEY=value` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValueList {
    List(Vec<String>),
    Map(BTreeMap<String, Option<Value>>),
}

impl KeyValueList {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::List(entries) => entries.is_empty(),
            Self::Map(entries) => entries.is_empty(),
        }
    }

    /// Normalizes into a string map. Entries without a value are dropped; a
    /// scalar value is rendered the way compose renders it.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            Self::List(entries) => entries
                .iter()
                .filter_map(|entry| {
                    let (key, value) = entry.split_once('=')?;
                    Some((key.to_string(), value.to_string()))
                })
                .collect(),
            Self::Map(entries) => entries
                .iter()
                .filter_map(|(key, value)| {
                    let rendered = scalar_to_string(value.as_ref()?)?;
                    Some((key.clone(), rendered))
                })
                .collect(),
        }
    }
}

impl Default for KeyValueList {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Service dependencies in either the short list form or the long map form
/// with per-dependency conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl DependsOn {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::List(names) => names.is_empty(),
            Self::Map(entries) => entries.is_empty(),
        }
    }

    /// The referenced service names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(entries) => entries.keys().map(String::as_str).collect(),
        }
    }
}

impl Default for DependsOn {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// A `depends_on` chain that loops back on itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between services: {}", .services.join(", "))]
pub struct CycleError {
    pub services: Vec<String>,
}

impl ComposeProject {
    /// Gives every service without an image reference the synthesized
    /// reference `<service>:<tag>`.
    pub fn assign_missing_images(&mut self, tag: &str) {
        for (name, service) in &mut self.services {
            if !service.has_image() {
                service.image = Some(format!("{name}:{tag}"));
            }
        }
    }

    /// Non-empty image references, de-duplicated, in service-name order.
    #[must_use]
    pub fn image_references(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut references = Vec::new();
        for service in self.services.values() {
            let Some(image) = service.image.as_deref() else {
                continue;
            };
            if !image.is_empty() && seen.insert(image) {
                references.push(image.to_string());
            }
        }
        references
    }

    /// Service names ordered so that dependencies come before dependents.
    /// Ties break alphabetically.
    ///
    /// # Errors
    /// Returns a [`CycleError`] when `depends_on` edges form a loop.
    pub fn services_in_dependency_order(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, service) in &self.services {
            let mut degree = 0;
            for dependency in service.depends_on.names() {
                // Unknown names are the loader's problem; skipping them here
                // keeps the ordering total over hand-built projects.
                if self.services.contains_key(dependency) {
                    degree += 1;
                    dependents.entry(dependency).or_default().push(name.as_str());
                }
            }
            in_degree.insert(name.as_str(), degree);
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.services.len());
        while let Some(name) = ready.pop_front() {
            order.push(name.to_string());
            for &dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.services.len() {
            let services = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(name, _)| (*name).to_string())
                .collect();
            return Err(CycleError { services });
        }
        Ok(order)
    }
}
