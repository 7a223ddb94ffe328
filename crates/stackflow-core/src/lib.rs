//! StackFlow core
//!
//! Declarative resource model and the pure half of the provisioning engine:
//! declaring a stack, turning references into a dependency graph, and diffing
//! the graph against the last recorded state into an ordered plan.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   build    ┌──────────────────┐   plan    ┌────────┐
//! │    Stack     ├───────────►│ DependencyGraph  ├──────────►│  Plan  │
//! │ (resources,  │            │ (edges, waves,   │           │ (steps │
//! │  exports)    │            │  cycle check)    │     ┌────►│ +after)│
//! └──────────────┘            └──────────────────┘     │     └────────┘
//!                                                       │
//!                                          ┌────────────┴───┐
//!                                          │   StackState   │
//!                                          │ (last applied) │
//!                                          └────────────────┘
//! ```
//!
//! Execution against a backend lives in `stackflow-cloud`.

pub mod error;
pub mod export;
pub mod graph;
pub mod model;
pub mod outputs;
pub mod plan;
pub mod stack;
pub mod state;

// Re-exports
pub use error::{Result, StackError};
pub use export::{ExportMap, collect_exports, exports_from_state};
pub use graph::DependencyGraph;
pub use model::{
    Config, KindSpec, Reference, RemovalPolicy, Resource, ResourceStatus, Value, resolve_config,
};
pub use outputs::{OutputEntry, OutputTable, Outputs};
pub use plan::{Action, Plan, PlanKind, PlanStep, PlanSummary, PriorInstance, plan, plan_destroy};
pub use stack::{Export, ResourceHandle, Stack, reference};
pub use state::{OrphanInstance, ResourceRecord, RunStatus, STATE_VERSION, StackState};
