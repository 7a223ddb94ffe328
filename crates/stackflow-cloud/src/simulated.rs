//! Simulated backend
//!
//! Keeps every instance in memory and derives plausible outputs from the kind
//! catalog. Used by the CLI's dry environments and by the tests, which can
//! inject failures per resource and inspect the calls that were made.

use crate::backend::{Backend, BackendError, BackendResult, Provisioned};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stackflow_core::Outputs;
use stackflow_core::model::{ID_ATTRIBUTE, kind};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// One call received by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub operation: Operation,
    pub kind: String,
    pub resource: String,
    pub id: Option<String>,
}

/// An instance held by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub kind: String,
    pub resource: String,
    pub config: serde_json::Value,
    pub outputs: Outputs,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    /// Fails the given operation, or every operation when `None`
    Permanent(Option<Operation>),
    Transient { remaining: u32 },
}

/// Persisted form of the instances, so separate processes share one backend
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    instances: Vec<Instance>,
}

#[derive(Debug, Default)]
struct Inventory {
    next_id: u64,
    instances: BTreeMap<String, Instance>,
    failures: HashMap<String, Failure>,
    calls: Vec<BackendCall>,
}

impl Inventory {
    /// Consume an injected failure for `resource`, if any
    fn take_failure(&mut self, resource: &str, operation: Operation) -> BackendResult<()> {
        let Some(failure) = self.failures.get_mut(resource) else {
            return Ok(());
        };
        match failure {
            Failure::Permanent(only) if only.is_none_or(|op| op == operation) => Err(
                BackendError::permanent(format!("simulated {operation:?} failure for {resource}")),
            ),
            Failure::Permanent(_) => Ok(()),
            Failure::Transient { remaining } if *remaining > 0 => {
                *remaining -= 1;
                Err(BackendError::transient(format!(
                    "simulated throttling for {resource}"
                )))
            }
            Failure::Transient { .. } => Ok(()),
        }
    }

    fn owner_of(&self, id: &str) -> String {
        self.instances
            .get(id)
            .map(|i| i.resource.clone())
            .unwrap_or_default()
    }

    fn resource_of(&self, kind: &str, id: &str) -> BackendResult<String> {
        let instance = self
            .instances
            .get(id)
            .ok_or_else(|| BackendError::permanent(format!("instance {id} not found")))?;
        if instance.kind != kind {
            return Err(BackendError::permanent(format!(
                "instance {id} is a {}, not a {kind}",
                instance.kind
            )));
        }
        Ok(instance.resource.clone())
    }
}

/// File each stack's instances are kept in, under the persistence directory
pub const INVENTORY_FILE: &str = "simulated.json";

/// In-memory backend
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    inventory: Mutex<Inventory>,
    /// Directory holding `<stack>/simulated.json`, when instances outlive the process
    persist_dir: Option<PathBuf>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep each stack's instances in `<dir>/<stack>/simulated.json`.
    ///
    /// The file is read when a run opens the stack and written when it
    /// closes it, both under the stack's run lock.
    pub fn persisted_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    /// Replace the instances with the ones saved by [`SimulatedBackend::save`];
    /// a missing file leaves the backend empty.
    pub async fn restore(&self, path: &Path) -> Result<()> {
        let snapshot = if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&content)?
        } else {
            Snapshot::default()
        };

        let mut inventory = self.inventory.lock().await;
        inventory.next_id = snapshot.next_id;
        inventory.instances = snapshot
            .instances
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();
        tracing::debug!("Loaded {} simulated instances", inventory.instances.len());
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let inventory = self.inventory.lock().await;
            Snapshot {
                next_id: inventory.next_id,
                instances: inventory.instances.values().cloned().collect(),
            }
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&snapshot)?).await?;
        Ok(())
    }

    fn inventory_path(&self, stack: &str) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(stack).join(INVENTORY_FILE))
    }

    /// Make every call take at least `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every operation on `resource` fails without retry
    pub async fn fail_permanently(&self, resource: impl Into<String>) {
        self.inventory
            .lock()
            .await
            .failures
            .insert(resource.into(), Failure::Permanent(None));
    }

    /// Every `operation` on `resource` fails without retry
    pub async fn fail_on(&self, resource: impl Into<String>, operation: Operation) {
        self.inventory
            .lock()
            .await
            .failures
            .insert(resource.into(), Failure::Permanent(Some(operation)));
    }

    /// The next `times` operations on `resource` fail with a transient error
    pub async fn fail_transiently(&self, resource: impl Into<String>, times: u32) {
        self.inventory
            .lock()
            .await
            .failures
            .insert(resource.into(), Failure::Transient { remaining: times });
    }

    pub async fn clear_failures(&self) {
        self.inventory.lock().await.failures.clear();
    }

    /// Calls received so far, in order
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.inventory.lock().await.calls.clone()
    }

    /// Instances currently held, ordered by id
    pub async fn instances(&self) -> Vec<Instance> {
        self.inventory
            .lock()
            .await
            .instances
            .values()
            .cloned()
            .collect()
    }

    pub async fn instance(&self, id: &str) -> Option<Instance> {
        self.inventory.lock().await.instances.get(id).cloned()
    }

    /// Highest number of calls that were in progress at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outputs a kind reports for the given configuration
fn derive_outputs(
    kind_name: &str,
    resource: &str,
    id: &str,
    config: &serde_json::Value,
) -> Outputs {
    let mut outputs = Outputs::new();
    match kind::lookup(kind_name) {
        Some(spec) => {
            for attribute in spec.outputs {
                let value = match config.get(*attribute) {
                    Some(v) => v.clone(),
                    None => synthesize(kind_name, resource, attribute),
                };
                outputs.insert(attribute.to_string(), value);
            }
        }
        None => {
            if let Some(object) = config.as_object() {
                for (key, value) in object {
                    outputs.insert(key.clone(), value.clone());
                }
            }
        }
    }
    outputs.insert(ID_ATTRIBUTE.to_string(), json!(id));
    outputs
}

fn synthesize(kind_name: &str, resource: &str, attribute: &str) -> serde_json::Value {
    match attribute {
        "arn" => json!(format!("arn:sim:{kind_name}:{resource}")),
        "port" => json!(3306),
        "revision" => json!(1),
        "public_subnets" | "private_subnets" => {
            json!([format!("{resource}-{attribute}-a"), format!("{resource}-{attribute}-b")])
        }
        _ => json!(format!("{resource}.{}.sim", attribute.replace('_', "-"))),
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create_resource(
        &self,
        kind: &str,
        name: &str,
        config: &serde_json::Value,
    ) -> BackendResult<Provisioned> {
        self.enter().await;
        let result = {
            let mut inventory = self.inventory.lock().await;
            inventory.calls.push(BackendCall {
                operation: Operation::Create,
                kind: kind.to_string(),
                resource: name.to_string(),
                id: None,
            });
            inventory.take_failure(name, Operation::Create).map(|()| {
                inventory.next_id += 1;
                let id = format!("{kind}-{:04}", inventory.next_id);
                let outputs = derive_outputs(kind, name, &id, config);
                inventory.instances.insert(
                    id.clone(),
                    Instance {
                        id: id.clone(),
                        kind: kind.to_string(),
                        resource: name.to_string(),
                        config: config.clone(),
                        outputs: outputs.clone(),
                    },
                );
                Provisioned { id, outputs }
            })
        };
        self.leave();
        result
    }

    async fn update_resource(
        &self,
        kind: &str,
        id: &str,
        config: &serde_json::Value,
    ) -> BackendResult<Outputs> {
        self.enter().await;
        let result = {
            let mut inventory = self.inventory.lock().await;
            let resource = inventory.resource_of(kind, id);
            let owner = inventory.owner_of(id);
            inventory.calls.push(BackendCall {
                operation: Operation::Update,
                kind: kind.to_string(),
                resource: owner,
                id: Some(id.to_string()),
            });
            resource.and_then(|resource| {
                inventory.take_failure(&resource, Operation::Update)?;
                let outputs = derive_outputs(kind, &resource, id, config);
                if let Some(instance) = inventory.instances.get_mut(id) {
                    instance.config = config.clone();
                    instance.outputs = outputs.clone();
                }
                Ok(outputs)
            })
        };
        self.leave();
        result
    }

    async fn open_stack(&self, stack: &str) -> BackendResult<()> {
        let Some(path) = self.inventory_path(stack) else {
            return Ok(());
        };
        self.restore(&path)
            .await
            .map_err(|e| BackendError::permanent(format!("failed to load {}: {e}", path.display())))
    }

    async fn close_stack(&self, stack: &str) -> BackendResult<()> {
        let Some(path) = self.inventory_path(stack) else {
            return Ok(());
        };
        self.save(&path)
            .await
            .map_err(|e| BackendError::permanent(format!("failed to save {}: {e}", path.display())))
    }

    async fn delete_resource(&self, kind: &str, id: &str) -> BackendResult<()> {
        self.enter().await;
        let result = {
            let mut inventory = self.inventory.lock().await;
            let resource = inventory.resource_of(kind, id);
            let owner = inventory.owner_of(id);
            inventory.calls.push(BackendCall {
                operation: Operation::Delete,
                kind: kind.to_string(),
                resource: owner,
                id: Some(id.to_string()),
            });
            resource.and_then(|resource| {
                inventory.take_failure(&resource, Operation::Delete)?;
                inventory.instances.remove(id);
                Ok(())
            })
        };
        self.leave();
        result
    }
}
