//! Concurrent plan executor
//!
//! Steps run as soon as every step listed in their `after` set has
//! succeeded, with at most `concurrency` backend calls in flight. A failed
//! step marks everything that transitively waits on it as skipped; branches
//! that do not depend on it keep going. Cancellation stops new steps from
//! starting and lets in-flight calls finish.

use crate::backend::{Backend, RetryConfig, with_retry};
use crate::result::{ExecutionRecord, Outcome};
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde_json::json;
use stackflow_core::model::ID_ATTRIBUTE;
use stackflow_core::{
    Action, OutputTable, Outputs, Plan, PlanStep, RemovalPolicy, ResourceStatus, RunStatus,
    resolve_config,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Options for executing a plan
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of backend calls in flight
    pub concurrency: usize,

    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Cancellation token shared between a run and whoever may interrupt it
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of executing one plan
#[derive(Debug, Clone)]
pub struct Execution {
    pub status: RunStatus,
    /// One record per plan step, in plan order
    pub records: Vec<ExecutionRecord>,
    pub outputs: OutputTable,
}

/// Overall status of a set of step records
pub fn run_status(records: &[ExecutionRecord]) -> RunStatus {
    if records.iter().any(|r| r.outcome == Outcome::Cancelled) {
        RunStatus::Cancelled
    } else if records.iter().all(|r| r.outcome.is_success()) {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    }
}

enum Prepared {
    /// Needs a backend call with this resolved configuration
    Call(serde_json::Value),
    /// Finished without a backend call
    Done(ExecutionRecord),
}

/// Bookkeeping of which steps may start
struct Schedule {
    dependents: Vec<Vec<usize>>,
    waiting: Vec<usize>,
    ready: BTreeSet<usize>,
    records: Vec<Option<ExecutionRecord>>,
}

impl Schedule {
    fn new(steps: &[PlanStep]) -> Self {
        let mut dependents = vec![Vec::new(); steps.len()];
        let mut waiting = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            waiting.push(step.after.len());
            for &prerequisite in &step.after {
                dependents[prerequisite].push(index);
            }
        }
        let ready = (0..steps.len()).filter(|&i| waiting[i] == 0).collect();

        Self {
            dependents,
            waiting,
            ready,
            records: vec![None; steps.len()],
        }
    }

    /// Lowest-indexed step whose prerequisites have all succeeded
    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop_first()
    }

    fn complete(&mut self, steps: &[PlanStep], index: usize, record: ExecutionRecord) {
        let succeeded = record.outcome.is_success();
        self.records[index] = Some(record);

        if succeeded {
            for &dependent in &self.dependents[index] {
                self.waiting[dependent] -= 1;
                if self.waiting[dependent] == 0 && self.records[dependent].is_none() {
                    self.ready.insert(dependent);
                }
            }
            return;
        }

        let mut pending = vec![index];
        while let Some(failed) = pending.pop() {
            let reason = format!("{} did not succeed", steps[failed].label());
            for &dependent in &self.dependents[failed] {
                if self.records[dependent].is_some() {
                    continue;
                }
                tracing::warn!(resource = %steps[dependent].label(), "Skipped: {}", reason);
                self.records[dependent] = Some(unstarted(
                    &steps[dependent],
                    Outcome::Skipped,
                    Some(reason.clone()),
                ));
                pending.push(dependent);
            }
        }
    }
}

fn unstarted(step: &PlanStep, outcome: Outcome, error: Option<String>) -> ExecutionRecord {
    let prior = step.prior.as_ref();
    ExecutionRecord {
        resource: step.resource.clone(),
        kind: step.kind.clone(),
        action: step.action,
        superseded: step.superseded,
        outcome,
        id: prior.map(|p| p.id.clone()),
        prior_id: prior.map(|p| p.id.clone()),
        resolved: serde_json::Value::Null,
        outputs: prior.map(|p| p.outputs.clone()).unwrap_or_default(),
        error,
        attempts: 0,
        started_at: None,
        finished_at: None,
    }
}

/// Runs the steps of a plan against a backend
pub struct Executor<'a, B: Backend + ?Sized> {
    backend: &'a B,
    options: &'a ExecuteOptions,
    cancel: Cancellation,
}

impl<'a, B: Backend + ?Sized> Executor<'a, B> {
    pub fn new(backend: &'a B, options: &'a ExecuteOptions) -> Self {
        Self {
            backend,
            options,
            cancel: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute `plan`, starting from the lifecycle table `outputs`
    pub async fn run(&self, plan: &Plan, mut outputs: OutputTable) -> Execution {
        let steps = plan.steps.as_slice();
        let concurrency = self.options.concurrency.max(1);
        let mut schedule = Schedule::new(steps);
        let mut running = FuturesUnordered::new();

        tracing::info!(
            stack = %plan.stack,
            steps = steps.len(),
            concurrency,
            "Executing plan"
        );

        loop {
            while running.len() < concurrency && !self.cancel.is_cancelled() {
                let Some(index) = schedule.next_ready() else {
                    break;
                };
                let step = &steps[index];
                match prepare(step, &mut outputs) {
                    Prepared::Call(resolved) => running.push(self.call(index, step, resolved)),
                    Prepared::Done(record) => {
                        track(&mut outputs, step, &record);
                        schedule.complete(steps, index, record);
                    }
                }
            }

            let Some((index, record)) = running.next().await else {
                break;
            };
            track(&mut outputs, &steps[index], &record);
            schedule.complete(steps, index, record);
        }

        let cancelled = self.cancel.is_cancelled();
        let records: Vec<ExecutionRecord> = schedule
            .records
            .into_iter()
            .zip(steps)
            .map(|(record, step)| {
                record.unwrap_or_else(|| {
                    let outcome = if cancelled {
                        Outcome::Cancelled
                    } else {
                        Outcome::Skipped
                    };
                    unstarted(step, outcome, None)
                })
            })
            .collect();

        if cancelled {
            let not_started = records
                .iter()
                .filter(|r| r.outcome == Outcome::Cancelled)
                .count();
            tracing::warn!(stack = %plan.stack, not_started, "Run cancelled");
        }

        Execution {
            status: run_status(&records),
            records,
            outputs,
        }
    }

    async fn call(
        &self,
        index: usize,
        step: &PlanStep,
        resolved: serde_json::Value,
    ) -> (usize, ExecutionRecord) {
        let started_at = Utc::now();
        let label = step.label();
        let prior_id = step.prior.as_ref().map(|p| p.id.clone());
        tracing::info!(resource = %label, kind = %step.kind, action = %step.action, "Starting");

        let backend = self.backend;
        let retry = &self.options.retry;
        let kind = step.kind.as_str();
        let name = step.resource.as_str();
        let id = prior_id.as_deref().unwrap_or_default();
        let config = &resolved;

        let (result, attempts) = match step.action {
            Action::Create | Action::Replace => {
                let (result, attempts) = with_retry(retry, &label, move || {
                    backend.create_resource(kind, name, config)
                })
                .await;
                (result.map(|p| (Some(p.id), p.outputs)), attempts)
            }
            Action::Update => {
                let (result, attempts) = with_retry(retry, &label, move || {
                    backend.update_resource(kind, id, config)
                })
                .await;
                (result.map(|outputs| (prior_id.clone(), outputs)), attempts)
            }
            Action::Delete => {
                let (result, attempts) =
                    with_retry(retry, &label, move || backend.delete_resource(kind, id)).await;
                (result.map(|()| (None, Outputs::new())), attempts)
            }
            Action::NoOp => (Ok((prior_id.clone(), Outputs::new())), 0),
        };

        let mut record = ExecutionRecord {
            resource: step.resource.clone(),
            kind: step.kind.clone(),
            action: step.action,
            superseded: step.superseded,
            outcome: Outcome::Failed,
            id: None,
            prior_id,
            resolved,
            outputs: Outputs::new(),
            error: None,
            attempts,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        };

        match result {
            Ok((id, mut outputs)) => {
                if let Some(id) = &id {
                    outputs
                        .entry(ID_ATTRIBUTE.to_string())
                        .or_insert_with(|| json!(id));
                }
                record.outcome = match step.action {
                    Action::Create => Outcome::Created,
                    Action::Update => Outcome::Updated,
                    Action::Replace => Outcome::Replaced,
                    Action::Delete => Outcome::Deleted,
                    Action::NoOp => Outcome::Unchanged,
                };
                record.id = id;
                record.outputs = outputs;
                tracing::info!(resource = %label, outcome = %record.outcome, attempts, "Finished");
            }
            Err(e) => {
                tracing::error!(
                    resource = %label,
                    action = %step.action,
                    attempts,
                    "Backend call failed: {}",
                    e
                );
                record.error = Some(e.message);
            }
        }

        (index, record)
    }
}

/// Decide whether `step` needs a backend call; resolves references for
/// apply steps and marks the resource as in progress.
fn prepare(step: &PlanStep, outputs: &mut OutputTable) -> Prepared {
    match step.action {
        Action::NoOp => Prepared::Done(unstarted(step, Outcome::Unchanged, None)),
        Action::Delete if step.removal == RemovalPolicy::Retain => {
            tracing::info!(
                resource = %step.label(),
                "Retained: dropped from management, instance left in place"
            );
            Prepared::Done(unstarted(step, Outcome::Retained, None))
        }
        Action::Delete => {
            if !step.superseded {
                outputs.set_status(&step.resource, ResourceStatus::Destroying);
            }
            Prepared::Call(serde_json::Value::Null)
        }
        Action::Create | Action::Update | Action::Replace => {
            match resolve_config(&step.config, outputs) {
                Ok(resolved) => {
                    outputs.set_status(&step.resource, ResourceStatus::Creating);
                    Prepared::Call(resolved)
                }
                Err(e) => {
                    tracing::error!(
                        resource = %step.resource,
                        "Cannot resolve configuration: {}",
                        e
                    );
                    Prepared::Done(unstarted(step, Outcome::Failed, Some(e.to_string())))
                }
            }
        }
    }
}

/// Reflect a finished step in the lifecycle table
fn track(outputs: &mut OutputTable, step: &PlanStep, record: &ExecutionRecord) {
    if step.superseded {
        return;
    }
    match record.outcome {
        Outcome::Created | Outcome::Updated | Outcome::Replaced => {
            outputs.record(
                &step.resource,
                ResourceStatus::Created,
                record.outputs.clone(),
            );
        }
        Outcome::Deleted | Outcome::Retained => {
            outputs.set_status(&step.resource, ResourceStatus::Destroyed);
        }
        Outcome::Failed => outputs.set_status(&step.resource, ResourceStatus::Failed),
        Outcome::Unchanged | Outcome::Skipped | Outcome::Cancelled => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Operation, SimulatedBackend};
    use stackflow_core::{Resource, Stack, plan};
    use std::time::Duration;

    fn quick() -> ExecuteOptions {
        ExecuteOptions {
            concurrency: 4,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
        }
    }

    fn buckets(count: usize) -> Plan {
        let mut stack = Stack::new("buckets");
        for i in 0..count {
            stack.add(Resource::new("bucket", format!("b{i}"))).unwrap();
        }
        plan(&stack.build().unwrap(), None)
    }

    fn chain() -> Plan {
        let mut stack = Stack::new("chain");
        let vpc = stack.add(Resource::new("network", "vpc")).unwrap();
        let db = stack
            .add(Resource::new("database", "db").with("vpc", vpc.attr("id")))
            .unwrap();
        stack
            .add(Resource::new("service", "app").with("db_host", db.attr("endpoint_address")))
            .unwrap();
        stack.add(Resource::new("bucket", "assets")).unwrap();
        plan(&stack.build().unwrap(), None)
    }

    #[tokio::test]
    async fn test_references_are_resolved_before_calls() {
        let backend = SimulatedBackend::new();
        let options = quick();
        let execution = Executor::new(&backend, &options)
            .run(&chain(), OutputTable::new())
            .await;

        assert_eq!(execution.status, RunStatus::Succeeded);
        let app = execution.records.iter().find(|r| r.resource == "app").unwrap();
        assert_eq!(app.resolved["db_host"], json!("db.endpoint-address.sim"));
        assert_eq!(
            execution.outputs.status("app"),
            Some(ResourceStatus::Created)
        );
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let backend = SimulatedBackend::new().with_latency(Duration::from_millis(20));
        let options = ExecuteOptions {
            concurrency: 2,
            ..quick()
        };
        let execution = Executor::new(&backend, &options)
            .run(&buckets(6), OutputTable::new())
            .await;

        assert_eq!(execution.status, RunStatus::Succeeded);
        assert_eq!(backend.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_independent_steps_run_concurrently() {
        let backend = SimulatedBackend::new().with_latency(Duration::from_millis(20));
        let options = ExecuteOptions {
            concurrency: 8,
            ..quick()
        };
        Executor::new(&backend, &options)
            .run(&buckets(6), OutputTable::new())
            .await;

        assert!(backend.peak_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_failure_skips_only_dependents() {
        let backend = SimulatedBackend::new();
        backend.fail_permanently("db").await;
        let options = quick();
        let execution = Executor::new(&backend, &options)
            .run(&chain(), OutputTable::new())
            .await;

        let outcome = |name: &str| {
            execution
                .records
                .iter()
                .find(|r| r.resource == name)
                .map(|r| r.outcome)
        };
        assert_eq!(outcome("vpc"), Some(Outcome::Created));
        assert_eq!(outcome("db"), Some(Outcome::Failed));
        assert_eq!(outcome("app"), Some(Outcome::Skipped));
        assert_eq!(outcome("assets"), Some(Outcome::Created));
        assert_eq!(execution.status, RunStatus::Failed);
        assert_eq!(execution.outputs.status("db"), Some(ResourceStatus::Failed));

        let calls = backend.calls().await;
        assert!(calls.iter().all(|c| c.resource != "app"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let backend = SimulatedBackend::new();
        backend.fail_transiently("assets", 2).await;
        let options = quick();
        let execution = Executor::new(&backend, &options)
            .run(&chain(), OutputTable::new())
            .await;

        let assets = execution.records.iter().find(|r| r.resource == "assets").unwrap();
        assert_eq!(assets.outcome, Outcome::Created);
        assert_eq!(assets.attempts, 3);
        assert_eq!(execution.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = SimulatedBackend::new();
        let options = quick();
        let cancel = Cancellation::new();
        cancel.cancel();

        let execution = Executor::new(&backend, &options)
            .with_cancellation(cancel)
            .run(&chain(), OutputTable::new())
            .await;

        assert_eq!(execution.status, RunStatus::Cancelled);
        assert!(execution.records.iter().all(|r| r.outcome == Outcome::Cancelled));
        assert!(backend.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_calls_finish() {
        let backend = SimulatedBackend::new().with_latency(Duration::from_millis(50));
        let options = ExecuteOptions {
            concurrency: 1,
            ..quick()
        };
        let cancel = Cancellation::new();
        let plan = buckets(3);
        let executor = Executor::new(&backend, &options).with_cancellation(cancel.clone());

        let (execution, ()) = tokio::join!(executor.run(&plan, OutputTable::new()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let outcomes: Vec<Outcome> = execution.records.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Created, Outcome::Cancelled, Outcome::Cancelled]
        );
        assert_eq!(execution.status, RunStatus::Cancelled);
        let creates = backend
            .calls()
            .await
            .iter()
            .filter(|c| c.operation == Operation::Create)
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_unresolvable_reference_fails_step() {
        // db is recorded but not created, so its outputs cannot be used
        let mut stack = Stack::new("s");
        let db = stack.add(Resource::new("database", "db")).unwrap();
        stack
            .add(Resource::new("service", "app").with("db_host", db.attr("endpoint_address")))
            .unwrap();
        let mut plan = plan(&stack.build().unwrap(), None);
        plan.steps[0].action = Action::NoOp;

        let backend = SimulatedBackend::new();
        let options = quick();
        let execution = Executor::new(&backend, &options)
            .run(&plan, OutputTable::new())
            .await;

        let app = &execution.records[1];
        assert_eq!(app.outcome, Outcome::Failed);
        assert!(app.error.as_deref().unwrap().contains("${db.endpoint_address}"));
        assert_eq!(execution.status, RunStatus::Failed);
    }
}
