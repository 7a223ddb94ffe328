//! Stack definition and planning errors

use thiserror::Error;

/// Errors raised while declaring, building, planning or exporting a stack
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackError {
    #[error("Duplicate resource name: {0}")]
    DuplicateName(String),

    #[error("Duplicate export name: {0}")]
    DuplicateExport(String),

    #[error("Unknown reference {reference} in {referrer}: {reason}")]
    UnknownReference {
        /// Resource (or export) that holds the reference
        referrer: String,
        /// The reference as written, e.g. `${vpc.id}`
        reference: String,
        reason: String,
    },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle {
        /// Resource names along the cycle; the first name is repeated at the end
        cycle: Vec<String>,
    },

    #[error("Unresolved reference {reference}: {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error("Outputs are not ready: {0}")]
    NotReady(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
