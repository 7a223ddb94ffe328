//! Execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_core::{
    Action, ExportMap, OutputTable, Outputs, PlanKind, RunStatus, Stack, collect_exports,
};

/// What happened to one plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    Replaced,
    Deleted,
    /// Dropped from management without a backend call (removal policy)
    Retained,
    Unchanged,
    Failed,
    /// Not attempted because a prerequisite did not succeed
    Skipped,
    /// Not attempted because the run was cancelled
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Created
                | Outcome::Updated
                | Outcome::Replaced
                | Outcome::Deleted
                | Outcome::Retained
                | Outcome::Unchanged
        )
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Replaced => "replaced",
            Outcome::Deleted => "deleted",
            Outcome::Retained => "retained",
            Outcome::Unchanged => "unchanged",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Record of one executed (or not executed) plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub resource: String,

    pub kind: String,

    pub action: Action,

    /// The step retired an instance superseded by a replacement
    #[serde(default)]
    pub superseded: bool,

    pub outcome: Outcome,

    /// Identifier of the instance the resource is backed by afterwards
    pub id: Option<String>,

    /// Identifier of the instance the step acted upon
    pub prior_id: Option<String>,

    /// Configuration as sent to the backend
    #[serde(default)]
    pub resolved: serde_json::Value,

    #[serde(default)]
    pub outputs: Outputs,

    pub error: Option<String>,

    /// Backend calls made, retries included
    pub attempts: u32,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn label(&self) -> String {
        if self.superseded {
            format!("{} (superseded)", self.resource)
        } else {
            self.resource.clone()
        }
    }
}

/// Result of one apply or destroy run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stack: String,

    pub kind: PlanKind,

    pub status: RunStatus,

    /// One record per plan step, in plan order
    pub records: Vec<ExecutionRecord>,

    /// Lifecycle and outputs at the end of the run
    pub outputs: OutputTable,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Record of the non-superseded step for `resource`
    pub fn record(&self, resource: &str) -> Option<&ExecutionRecord> {
        self.records
            .iter()
            .find(|r| r.resource == resource && !r.superseded)
    }

    pub fn outcome(&self, resource: &str) -> Option<Outcome> {
        self.record(resource).map(|r| r.outcome)
    }

    pub fn records_with(&self, outcome: Outcome) -> Vec<&ExecutionRecord> {
        self.records.iter().filter(|r| r.outcome == outcome).collect()
    }

    pub fn failed(&self) -> Vec<&ExecutionRecord> {
        self.records_with(Outcome::Failed)
    }

    pub fn skipped(&self) -> Vec<&ExecutionRecord> {
        self.records_with(Outcome::Skipped)
    }

    /// Records of steps that succeeded, in plan order
    pub fn completed(&self) -> Vec<&ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome.is_success())
            .collect()
    }

    /// Resolve the exports of `stack` against this run's outputs
    pub fn exports(&self, stack: &Stack) -> stackflow_core::Result<ExportMap> {
        collect_exports(stack.exports(), Some(self.status), &self.outputs)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in &self.records {
            match record.outcome {
                Outcome::Created => summary.created += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Replaced => summary.replaced += 1,
                Outcome::Deleted if record.superseded => summary.retired += 1,
                Outcome::Deleted => summary.deleted += 1,
                Outcome::Retained => summary.retained += 1,
                Outcome::Unchanged => summary.unchanged += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Counts of step outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    /// Superseded instances deleted after a replacement
    pub retired: usize,
    pub retained: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} replaced, {} deleted, {} unchanged",
            self.created, self.updated, self.replaced, self.deleted, self.unchanged
        )?;
        if self.retained > 0 {
            write!(f, ", {} retained", self.retained)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}
