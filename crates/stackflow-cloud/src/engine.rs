//! Provisioning engine
//!
//! Ties planning, execution and persistence together. Every run holds the
//! stack's lock for its whole duration and writes the reconciled state back,
//! whatever the outcome.

use crate::backend::Backend;
use crate::error::Result;
use crate::executor::{Cancellation, ExecuteOptions, Executor};
use crate::result::{ExecutionRecord, ExecutionResult, Outcome};
use crate::store::StateStore;
use chrono::Utc;
use stackflow_core::{
    DependencyGraph, ExportMap, OrphanInstance, OutputTable, Plan, PlanKind, PlanStep,
    ResourceRecord, ResourceStatus, RunStatus, Stack, StackState, exports_from_state, plan,
    plan_destroy,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub struct Engine<B: Backend + ?Sized, S: StateStore> {
    backend: Arc<B>,
    store: S,
    options: ExecuteOptions,
}

impl<B: Backend + ?Sized, S: StateStore> Engine<B, S> {
    pub fn new(backend: Arc<B>, store: S) -> Self {
        Self {
            backend,
            store,
            options: ExecuteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Last recorded state of `stack`
    pub async fn state(&self, stack: &str) -> Result<Option<StackState>> {
        self.store.load(stack).await
    }

    /// Plan `stack` against its recorded state without executing anything
    pub async fn plan(&self, stack: &Stack) -> Result<Plan> {
        let graph = stack.build()?;
        let previous = self.store.load(stack.name()).await?;
        Ok(plan(&graph, previous.as_ref()))
    }

    /// Plan the teardown of everything recorded for `stack`
    pub async fn plan_destroy(&self, stack: &str) -> Result<Plan> {
        Ok(match self.store.load(stack).await? {
            Some(state) => plan_destroy(&state),
            None => Plan::empty(stack, PlanKind::Destroy),
        })
    }

    /// Converge the backend onto `stack`
    #[tracing::instrument(skip_all, fields(stack = %stack.name()))]
    pub async fn apply(&self, stack: &Stack, cancel: &Cancellation) -> Result<ExecutionResult> {
        let graph = stack.build()?;
        let lock = self.store.acquire_lock(stack.name()).await?;

        let result = self
            .with_backend(stack.name(), self.apply_locked(&graph, cancel))
            .await;
        let released = lock.release().await;
        let result = result?;
        released?;
        Ok(result)
    }

    async fn apply_locked(
        &self,
        graph: &DependencyGraph,
        cancel: &Cancellation,
    ) -> Result<ExecutionResult> {
        let previous = self.store.load(graph.stack()).await?;
        let plan = plan(graph, previous.as_ref());
        tracing::info!(stack = %plan.stack, "Plan: {}", plan.summary());

        self.execute(plan, previous, cancel).await
    }

    /// Delete everything recorded for `stack`, in reverse apply order
    #[tracing::instrument(skip(self, cancel))]
    pub async fn destroy(&self, stack: &str, cancel: &Cancellation) -> Result<ExecutionResult> {
        let lock = self.store.acquire_lock(stack).await?;

        let result = self
            .with_backend(stack, self.destroy_locked(stack, cancel))
            .await;
        let released = lock.release().await;
        let result = result?;
        released?;
        Ok(result)
    }

    /// Run `body` between the backend's open and close of `stack`
    async fn with_backend<T>(
        &self,
        stack: &str,
        body: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.backend.open_stack(stack).await?;
        let result = body.await;
        let closed = self.backend.close_stack(stack).await;
        let result = result?;
        closed?;
        Ok(result)
    }

    async fn destroy_locked(&self, stack: &str, cancel: &Cancellation) -> Result<ExecutionResult> {
        let Some(previous) = self.store.load(stack).await? else {
            tracing::info!(stack, "Nothing to destroy");
            return Ok(ExecutionResult {
                stack: stack.to_string(),
                kind: PlanKind::Destroy,
                status: RunStatus::Succeeded,
                records: Vec::new(),
                outputs: OutputTable::new(),
                duration_ms: 0,
            });
        };

        let plan = plan_destroy(&previous);
        tracing::info!(stack, "Destroying {} resources", plan.steps.len());
        self.execute(plan, Some(previous), cancel).await
    }

    async fn execute(
        &self,
        plan: Plan,
        previous: Option<StackState>,
        cancel: &Cancellation,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let outputs = previous
            .as_ref()
            .map(OutputTable::from_state)
            .unwrap_or_default();

        let execution = Executor::new(self.backend.as_ref(), &self.options)
            .with_cancellation(cancel.clone())
            .run(&plan, outputs)
            .await;

        let state = reconcile(previous, &plan, &execution.records, execution.status);
        self.store.save(&state).await?;

        let result = ExecutionResult {
            stack: plan.stack.clone(),
            kind: plan.kind,
            status: execution.status,
            records: execution.records,
            outputs: execution.outputs,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            stack = %result.stack,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Run finished: {}",
            result.summary()
        );
        Ok(result)
    }

    /// Exports of `stack` as of its last run
    pub async fn outputs(&self, stack: &Stack) -> Result<ExportMap> {
        let state = self.store.load(stack.name()).await?;
        Ok(exports_from_state(stack.exports(), state.as_ref())?)
    }
}

/// Fold the records of a run into the state it started from
pub fn reconcile(
    previous: Option<StackState>,
    plan: &Plan,
    records: &[ExecutionRecord],
    status: RunStatus,
) -> StackState {
    let mut state = previous.unwrap_or_else(|| StackState::new(plan.stack.clone()));
    let now = Utc::now();

    for (step, record) in plan.steps.iter().zip(records) {
        if step.superseded {
            retire(&mut state, step, record);
            continue;
        }

        match record.outcome {
            Outcome::Created | Outcome::Updated | Outcome::Replaced => {
                let created_at = match (record.outcome, state.get_resource(&step.resource)) {
                    (Outcome::Updated, Some(existing)) => existing.created_at,
                    _ => now,
                };
                let mut resource = ResourceRecord::new(
                    record.id.clone().unwrap_or_default(),
                    step.kind.clone(),
                )
                .with_config(step.config.clone())
                .with_depends_on(step.depends_on.clone());
                resource.resolved = record.resolved.clone();
                resource.outputs = record.outputs.clone();
                resource.removal = step.removal;
                resource.created_at = created_at;
                resource.updated_at = now;
                state.set_resource(step.resource.clone(), resource);
            }
            Outcome::Unchanged => {
                if let Some(existing) = state.resources.get_mut(&step.resource) {
                    existing.depends_on = step.depends_on.clone();
                    existing.removal = step.removal;
                }
            }
            Outcome::Deleted | Outcome::Retained => {
                state.remove_resource(&step.resource);
            }
            Outcome::Failed => {
                // a failed create leaves nothing behind to record
                if let Some(existing) = state.resources.get_mut(&step.resource) {
                    existing.status = ResourceStatus::Failed;
                    existing.updated_at = now;
                }
            }
            Outcome::Skipped | Outcome::Cancelled => {}
        }
    }

    match plan.kind {
        PlanKind::Apply => {
            let previous_order = std::mem::take(&mut state.apply_order);
            let mut order: Vec<String> = plan
                .apply_order()
                .into_iter()
                .filter(|name| state.resources.contains_key(*name))
                .map(str::to_string)
                .collect();
            for name in previous_order {
                if state.resources.contains_key(&name) && !order.contains(&name) {
                    order.push(name);
                }
            }
            state.apply_order = order;
        }
        PlanKind::Destroy => {
            let resources = &state.resources;
            state.apply_order.retain(|name| resources.contains_key(name));
        }
    }

    state.last_run = Some(status);
    state.updated_at = now;
    state
}

/// Account for the delete of a superseded instance
fn retire(state: &mut StackState, step: &PlanStep, record: &ExecutionRecord) {
    let Some(id) = record.prior_id.as_deref() else {
        return;
    };

    if record.outcome.is_success() {
        state.orphans.retain(|orphan| orphan.id != id);
        return;
    }

    // only an instance whose replacement exists becomes an orphan
    let replaced = state
        .get_resource(&step.resource)
        .is_some_and(|current| current.id != id);
    if !replaced || state.orphans.iter().any(|orphan| orphan.id == id) {
        return;
    }

    tracing::warn!(
        resource = %step.resource,
        id,
        "Superseded instance left in place, it will be deleted by the next apply"
    );
    let dependents = state
        .dependents_of(&step.resource)
        .into_iter()
        .map(str::to_string)
        .collect();
    state.orphans.push(OrphanInstance {
        resource: step.resource.clone(),
        kind: step.kind.clone(),
        id: id.to_string(),
        removal: step.removal,
        dependents,
    });
}
