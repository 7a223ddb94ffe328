//! Last-applied state of a stack
//!
//! The state records what the backend actually holds after a run: one record
//! per managed resource, instances superseded by a replacement that still
//! await deletion, and the apply order later reversed by destroy.

use crate::model::{Config, RemovalPolicy, ResourceStatus};
use crate::outputs::Outputs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_VERSION: u32 = 1;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Persisted state of one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// State file version
    pub version: u32,

    pub stack: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Managed resources by name
    pub resources: BTreeMap<String, ResourceRecord>,

    /// Instances replaced by a newer one but not deleted yet
    #[serde(default)]
    pub orphans: Vec<OrphanInstance>,

    /// Order in which the last apply provisioned the resources
    #[serde(default)]
    pub apply_order: Vec<String>,

    #[serde(default)]
    pub last_run: Option<RunStatus>,
}

impl StackState {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            stack: stack.into(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            orphans: Vec::new(),
            apply_order: Vec::new(),
            last_run: None,
        }
    }

    pub fn get_resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, name: impl Into<String>, record: ResourceRecord) {
        self.resources.insert(name.into(), record);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.orphans.is_empty()
    }

    /// Exact reverse of the recorded apply order, followed by any recorded
    /// resource the order does not mention.
    pub fn destroy_order(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self
            .apply_order
            .iter()
            .rev()
            .map(String::as_str)
            .filter(|name| self.resources.contains_key(*name))
            .collect();
        for name in self.resources.keys() {
            if !order.contains(&name.as_str()) {
                order.push(name);
            }
        }
        order
    }

    /// Names of recorded resources that depended on `name` when last applied
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, record)| record.depends_on.iter().any(|d| d == name))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Backend-assigned identifier
    pub id: String,

    pub kind: String,

    pub status: ResourceStatus,

    /// Declared configuration at the time of the last successful apply
    pub config: Config,

    /// Configuration as sent to the backend, references resolved
    #[serde(default)]
    pub resolved: serde_json::Value,

    /// Output attributes reported by the backend
    #[serde(default)]
    pub outputs: Outputs,

    /// Resources this one depended on when last applied
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub removal: RemovalPolicy,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: kind.into(),
            status: ResourceStatus::Created,
            config: Config::new(),
            resolved: serde_json::Value::Null,
            outputs: Outputs::new(),
            depends_on: Vec::new(),
            removal: RemovalPolicy::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn get_output<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.outputs
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A superseded instance still present in the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanInstance {
    /// Name of the resource the instance used to back
    pub resource: String,
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub removal: RemovalPolicy,
    /// Resources that depended on the resource when the instance was replaced
    #[serde(default)]
    pub dependents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_destroy_order_reverses_apply_order() {
        let mut state = StackState::new("test");
        for name in ["vpc", "bucket", "db"] {
            state.set_resource(name, ResourceRecord::new(format!("{name}-1"), "network"));
        }
        state.apply_order = vec!["vpc".into(), "bucket".into(), "db".into()];

        assert_eq!(state.destroy_order(), vec!["db", "bucket", "vpc"]);
    }

    #[test]
    fn test_destroy_order_appends_unordered() {
        let mut state = StackState::new("test");
        state.set_resource("vpc", ResourceRecord::new("vpc-1", "network"));
        state.set_resource("extra", ResourceRecord::new("x-1", "bucket"));
        state.apply_order = vec!["gone".into(), "vpc".into()];

        assert_eq!(state.destroy_order(), vec!["vpc", "extra"]);
    }

    #[test]
    fn test_state_json_roundtrip() {
        let mut state = StackState::new("test");
        state.set_resource(
            "db",
            ResourceRecord::new("database-0001", "database")
                .with_output("port", json!(3306))
                .with_depends_on(vec!["vpc".into()]),
        );
        state.last_run = Some(RunStatus::Succeeded);

        let text = serde_json::to_string_pretty(&state).unwrap();
        let loaded: StackState = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.resources["db"].get_output::<u16>("port"), Some(3306));
        assert_eq!(loaded.dependents_of("vpc"), vec!["db"]);
    }
}
