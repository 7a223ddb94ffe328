//! Resource model
//!
//! Resources, configuration values, references and the kind catalog.

pub mod kind;
mod resource;
mod value;

pub use kind::{CATALOG, ID_ATTRIBUTE, KindSpec};
pub use resource::{RemovalPolicy, Resource, ResourceStatus};
pub use value::{Config, Reference, Value, resolve_config};

pub(crate) use value::unknown_reference;
