//! Lifecycle and output table
//!
//! Tracks, per resource, its lifecycle status and the output attributes the
//! backend reported. References are dereferenced against this table.

use crate::error::{Result, StackError};
use crate::model::{Reference, ResourceStatus};
use crate::state::StackState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output attributes reported by the backend for one resource
pub type Outputs = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub status: ResourceStatus,
    pub outputs: Outputs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTable {
    entries: BTreeMap<String, OutputEntry>,
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from the last recorded state
    pub fn from_state(state: &StackState) -> Self {
        let entries = state
            .resources
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    OutputEntry {
                        status: record.status,
                        outputs: record.outputs.clone(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn set_status(&mut self, resource: &str, status: ResourceStatus) {
        self.entries
            .entry(resource.to_string())
            .and_modify(|e| e.status = status)
            .or_insert_with(|| OutputEntry {
                status,
                outputs: Outputs::new(),
            });
    }

    pub fn record(&mut self, resource: &str, status: ResourceStatus, outputs: Outputs) {
        self.entries
            .insert(resource.to_string(), OutputEntry { status, outputs });
    }

    pub fn status(&self, resource: &str) -> Option<ResourceStatus> {
        self.entries.get(resource).map(|e| e.status)
    }

    pub fn get(&self, resource: &str) -> Option<&OutputEntry> {
        self.entries.get(resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutputEntry)> {
        self.entries.iter()
    }

    /// Dereference `reference`; only `Created` resources have usable outputs
    pub fn lookup(&self, reference: &Reference) -> Result<&serde_json::Value> {
        let unresolved = |reason: String| StackError::UnresolvedReference {
            reference: reference.to_string(),
            reason,
        };

        let entry = self
            .entries
            .get(&reference.resource)
            .ok_or_else(|| unresolved(format!("{} has not been provisioned", reference.resource)))?;

        if entry.status != ResourceStatus::Created {
            return Err(unresolved(format!(
                "{} is {}, not created",
                reference.resource, entry.status
            )));
        }

        entry.outputs.get(&reference.attribute).ok_or_else(|| {
            unresolved(format!(
                "{} did not report attribute '{}'",
                reference.resource, reference.attribute
            ))
        })
    }
}
