//! StackFlow execution
//!
//! Runs plans produced by `stackflow-core` against a provisioning backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  StackFlow CLI                   │
//! │           (stackflow apply / destroy)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Engine: plan -> execute -> reconcile     │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │   Executor   │  │  StateStore  │            │
//! │  │ (concurrent) │  │ (file, lock) │            │
//! │  └──────┬───────┘  └──────────────┘            │
//! └─────────┼───────────────────────────────────────┘
//!           │
//! ┌─────────▼─────────┐
//! │  trait Backend    │
//! │  (simulated, ...) │
//! └───────────────────┘
//! ```

pub mod backend;
pub mod engine;
pub mod error;
pub mod executor;
pub mod result;
pub mod simulated;
pub mod store;

// Re-exports
pub use backend::{
    Backend, BackendError, BackendResult, FailureKind, Provisioned, RetryConfig, with_retry,
};
pub use engine::{Engine, reconcile};
pub use error::{CloudError, Result};
pub use executor::{Cancellation, ExecuteOptions, Execution, Executor, run_status};
pub use result::{ExecutionRecord, ExecutionResult, Outcome, RunSummary};
pub use simulated::{BackendCall, INVENTORY_FILE, Instance, Operation, SimulatedBackend};
pub use store::{FileStateStore, MemoryStateStore, StateLock, StateStore};
