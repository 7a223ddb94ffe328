//! Plan engine
//!
//! Turns a dependency graph and the last recorded state into an ordered list
//! of steps. Every step carries the indices of the steps that must finish
//! before it may start, so the executor never has to look at the graph again.

use crate::graph::DependencyGraph;
use crate::model::{Config, RemovalPolicy, Resource, ResourceStatus, kind};
use crate::outputs::Outputs;
use crate::state::{OrphanInstance, ResourceRecord, StackState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Type of action to perform on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new resource
    Create,
    /// Update an existing resource in place
    Update,
    /// Create a new instance, then retire the old one
    Replace,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl Action {
    /// Short marker used when rendering plans
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::Delete => "-",
            Action::NoOp => "=",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Replace => write!(f, "replace"),
            Action::Delete => write!(f, "delete"),
            Action::NoOp => write!(f, "no-op"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Apply,
    Destroy,
}

/// The backend instance a step acts upon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorInstance {
    pub id: String,
    /// Kind the instance was created as
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub removal: RemovalPolicy,
    #[serde(default)]
    pub outputs: Outputs,
    #[serde(default)]
    pub resolved: serde_json::Value,
}

impl From<&ResourceRecord> for PriorInstance {
    fn from(record: &ResourceRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind.clone(),
            removal: record.removal,
            outputs: record.outputs.clone(),
            resolved: record.resolved.clone(),
        }
    }
}

/// One (resource, action) pair of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub resource: String,

    pub kind: String,

    pub action: Action,

    /// Declared configuration to apply (empty for deletes)
    pub config: Config,

    /// Resources the declared resource depends on
    pub depends_on: Vec<String>,

    pub removal: RemovalPolicy,

    /// Attributes whose change caused an update or replacement
    pub changed: Vec<String>,

    /// Instance currently recorded for the resource, if any
    pub prior: Option<PriorInstance>,

    /// Set on the delete that retires an instance replaced by a newer one
    pub superseded: bool,

    /// Indices of the steps that must succeed before this one starts
    pub after: Vec<usize>,
}

impl PlanStep {
    /// Whether the step belongs to the apply phase (not a delete)
    pub fn is_apply(&self) -> bool {
        self.action != Action::Delete
    }

    /// Name used in logs and reports
    pub fn label(&self) -> String {
        if self.superseded {
            format!("{} (superseded)", self.resource)
        } else {
            self.resource.clone()
        }
    }

    fn delete(
        resource: &str,
        kind: &str,
        id: &str,
        removal: RemovalPolicy,
        superseded: bool,
        after: Vec<usize>,
    ) -> Self {
        Self {
            resource: resource.to_string(),
            kind: kind.to_string(),
            action: Action::Delete,
            config: Config::new(),
            depends_on: Vec::new(),
            removal,
            changed: Vec::new(),
            prior: Some(PriorInstance {
                id: id.to_string(),
                kind: kind.to_string(),
                removal,
                outputs: Outputs::new(),
                resolved: serde_json::Value::Null,
            }),
            superseded,
            after,
        }
    }
}

/// Plan containing all steps to be executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub stack: String,

    pub kind: PlanKind,

    pub steps: Vec<PlanStep>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(stack: impl Into<String>, kind: PlanKind, steps: Vec<PlanStep>) -> Self {
        let has_changes = steps.iter().any(|s| s.action != Action::NoOp);
        Self {
            stack: stack.into(),
            kind,
            steps,
            has_changes,
        }
    }

    pub fn empty(stack: impl Into<String>, kind: PlanKind) -> Self {
        Self::new(stack, kind, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get steps by action
    pub fn steps_by_action(&self, action: Action) -> Vec<&PlanStep> {
        self.steps.iter().filter(|s| s.action == action).collect()
    }

    /// The apply-phase step for `resource`
    pub fn step(&self, resource: &str) -> Option<&PlanStep> {
        self.steps
            .iter()
            .find(|s| s.resource == resource && !s.superseded)
    }

    /// Resource names of the apply phase, in plan order
    pub fn apply_order(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.is_apply())
            .map(|s| s.resource.as_str())
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            match step.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Delete if !step.superseded => summary.delete += 1,
                Action::Delete => {}
                Action::NoOp => summary.no_change += 1,
            }
        }
        summary
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}

/// Compute the apply plan for `graph` against the previous state.
///
/// Step order: the apply phase in topological order (waves in declaration
/// order), then deletes of resources no longer declared (reverse of the
/// recorded apply order), then deletes of instances superseded by a
/// replacement.
pub fn plan(graph: &DependencyGraph, previous: Option<&StackState>) -> Plan {
    let mut steps: Vec<PlanStep> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut replaced: HashSet<String> = HashSet::new();

    for resource in graph.apply_order() {
        let record = previous.and_then(|s| s.get_resource(&resource.name));
        let (action, changed) = match record {
            None => (Action::Create, Vec::new()),
            Some(record) => diff(resource, record, &replaced),
        };
        if action == Action::Replace {
            replaced.insert(resource.name.clone());
        }

        let depends_on: Vec<String> = graph
            .dependencies_of(&resource.name)
            .into_iter()
            .map(str::to_string)
            .collect();
        let after = positions(&position, depends_on.iter().map(String::as_str));

        tracing::debug!(resource = %resource.name, %action, ?changed, "Planned step");
        position.insert(resource.name.clone(), steps.len());
        steps.push(PlanStep {
            resource: resource.name.clone(),
            kind: resource.kind.clone(),
            action,
            config: resource.config.clone(),
            depends_on,
            removal: resource.removal,
            changed,
            prior: record.map(PriorInstance::from),
            superseded: false,
            after,
        });
    }

    let replace_steps: Vec<usize> = steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.action == Action::Replace)
        .map(|(i, _)| i)
        .collect();

    if let Some(state) = previous {
        for name in state.destroy_order() {
            if graph.contains(name) {
                continue;
            }
            let Some(record) = state.get_resource(name) else {
                continue;
            };
            let after = positions(&position, state.dependents_of(name));
            position.insert(name.to_string(), steps.len());
            steps.push(PlanStep::delete(
                name,
                &record.kind,
                &record.id,
                record.removal,
                false,
                after,
            ));
        }

        for orphan in &state.orphans {
            let after = orphan_prerequisites(graph, &position, orphan);
            steps.push(PlanStep::delete(
                &orphan.resource,
                &orphan.kind,
                &orphan.id,
                orphan.removal,
                true,
                after,
            ));
        }
    }

    for index in replace_steps {
        let step = &steps[index];
        let Some(prior) = &step.prior else {
            continue;
        };
        let mut after: BTreeSet<usize> = BTreeSet::from([index]);
        after.extend(positions(&position, graph.dependents_of(&step.resource)));
        if let Some(state) = previous {
            after.extend(positions(&position, state.dependents_of(&step.resource)));
        }

        // the old instance is deleted as what it was created as
        let retire = PlanStep::delete(
            &step.resource,
            &prior.kind,
            &prior.id,
            prior.removal,
            true,
            after.into_iter().collect(),
        );
        steps.push(retire);
    }

    Plan::new(graph.stack(), PlanKind::Apply, steps)
}

/// Compute the destroy plan: the exact reverse of the recorded apply order
pub fn plan_destroy(state: &StackState) -> Plan {
    let mut steps: Vec<PlanStep> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for name in state.destroy_order() {
        let Some(record) = state.get_resource(name) else {
            continue;
        };
        let after = positions(&position, state.dependents_of(name));
        position.insert(name.to_string(), steps.len());
        steps.push(PlanStep::delete(
            name,
            &record.kind,
            &record.id,
            record.removal,
            false,
            after,
        ));
    }

    for orphan in &state.orphans {
        let after = positions(&position, orphan.dependents.iter().map(String::as_str));
        steps.push(PlanStep::delete(
            &orphan.resource,
            &orphan.kind,
            &orphan.id,
            orphan.removal,
            true,
            after,
        ));
    }

    Plan::new(state.stack.clone(), PlanKind::Destroy, steps)
}

/// Decide the action for a resource that already exists
fn diff(
    resource: &Resource,
    record: &ResourceRecord,
    replaced: &HashSet<String>,
) -> (Action, Vec<String>) {
    if resource.kind != record.kind {
        return (Action::Replace, vec!["kind".to_string()]);
    }

    let mut changed: BTreeSet<String> = resource
        .config
        .keys()
        .chain(record.config.keys())
        .filter(|key| resource.config.get(*key) != record.config.get(*key))
        .cloned()
        .collect();

    // attributes pointing at a replaced resource must be repointed
    for (attr, value) in &resource.config {
        if replaced.iter().any(|r| value.mentions(r)) {
            changed.insert(attr.clone());
        }
    }

    if changed.is_empty() {
        if record.status == ResourceStatus::Created {
            return (Action::NoOp, Vec::new());
        }
        return (Action::Update, Vec::new());
    }

    let action = if changed
        .iter()
        .any(|attr| kind::is_immutable(&resource.kind, attr))
    {
        Action::Replace
    } else {
        Action::Update
    };
    (action, changed.into_iter().collect())
}

fn orphan_prerequisites(
    graph: &DependencyGraph,
    position: &HashMap<String, usize>,
    orphan: &OrphanInstance,
) -> Vec<usize> {
    let mut after: BTreeSet<usize> = BTreeSet::new();
    after.extend(positions(position, [orphan.resource.as_str()]));
    after.extend(positions(position, orphan.dependents.iter().map(String::as_str)));
    after.extend(positions(position, graph.dependents_of(&orphan.resource)));
    after.into_iter().collect()
}

fn positions<'a>(
    position: &HashMap<String, usize>,
    names: impl IntoIterator<Item = &'a str>,
) -> Vec<usize> {
    let mut found: Vec<usize> = names
        .into_iter()
        .filter_map(|name| position.get(name).copied())
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}
