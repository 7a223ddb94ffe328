//! Declared resources and their lifecycle

use super::value::{Config, Reference, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// What happens to the real object when its declaration goes away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Delete the object through the backend
    #[default]
    Destroy,
    /// Stop managing the object but leave it in place
    Retain,
}

impl std::fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalPolicy::Destroy => write!(f, "destroy"),
            RemovalPolicy::Retain => write!(f, "retain"),
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "destroy" => Ok(RemovalPolicy::Destroy),
            "retain" => Ok(RemovalPolicy::Retain),
            other => Err(format!(
                "unknown removal policy '{}' (expected destroy or retain)",
                other
            )),
        }
    }
}

/// Lifecycle state of a resource during and after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Planned,
    Creating,
    Created,
    Failed,
    Destroying,
    Destroyed,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Planned => write!(f, "planned"),
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Created => write!(f, "created"),
            ResourceStatus::Failed => write!(f, "failed"),
            ResourceStatus::Destroying => write!(f, "destroying"),
            ResourceStatus::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A single declared infrastructure object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique name within the stack
    pub name: String,

    /// Kind tag (e.g. "network", "database")
    pub kind: String,

    /// Attribute name to literal or reference
    pub config: Config,

    /// Explicit ordering hints in addition to references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub removal: RemovalPolicy,
}

impl Resource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: Config::new(),
            depends_on: Vec::new(),
            removal: RemovalPolicy::default(),
        }
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(attribute.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn depends_on(mut self, resource: impl Into<String>) -> Self {
        self.depends_on.push(resource.into());
        self
    }

    pub fn with_removal(mut self, removal: RemovalPolicy) -> Self {
        self.removal = removal;
        self
    }

    /// Every reference in the configuration, paired with the attribute holding it
    pub fn references(&self) -> Vec<(&str, &Reference)> {
        self.config
            .iter()
            .flat_map(|(attr, value)| {
                value
                    .references()
                    .into_iter()
                    .map(move |r| (attr.as_str(), r))
            })
            .collect()
    }

    /// Names of all resources this one depends on, through references or hints
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.references()
            .into_iter()
            .map(|(_, r)| r.resource.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }
}
