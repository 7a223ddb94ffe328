//! Execution error types

use crate::backend::BackendError;
use stackflow_core::StackError;
use thiserror::Error;

/// Errors that abort a run before or after execution.
///
/// Failures of individual backend operations never surface here; they are
/// recorded per step in the execution result.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
