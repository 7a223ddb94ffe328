//! Stack declaration
//!
//! A [`Stack`] is an explicit value: resources are declared into it one by one
//! and it is handed to the graph builder afterwards. Nothing is provisioned
//! while declaring.

use crate::error::{Result, StackError};
use crate::graph::{self, DependencyGraph};
use crate::model::{Config, Reference, Resource, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle to a declared resource, used to build references to its outputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    name: String,
    kind: String,
}

impl ResourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Reference to one of this resource's output attributes
    pub fn attr(&self, attribute: impl Into<String>) -> Reference {
        Reference::new(self.name.clone(), attribute)
    }
}

/// Build a reference to `attribute` of `resource`
pub fn reference(resource: &ResourceHandle, attribute: &str) -> Reference {
    resource.attr(attribute)
}

/// A named value the stack publishes once it has been applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub value: Value,
}

/// A named collection of resources provisioned and destroyed together
#[derive(Debug, Clone, Default)]
pub struct Stack {
    name: String,
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
    exports: Vec<Export>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a resource from its kind, name and configuration
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        config: Config,
    ) -> Result<ResourceHandle> {
        self.add(Resource::new(kind, name).with_config(config))
    }

    /// Declare a fully built resource (with hints and removal policy)
    pub fn add(&mut self, resource: Resource) -> Result<ResourceHandle> {
        if self.index.contains_key(&resource.name) {
            return Err(StackError::DuplicateName(resource.name));
        }

        let handle = ResourceHandle {
            name: resource.name.clone(),
            kind: resource.kind.clone(),
        };
        tracing::debug!(resource = %handle.name, kind = %handle.kind, "Declared resource");

        self.index.insert(resource.name.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(handle)
    }

    /// Publish `value` under `name` once the stack has been applied
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        if self.exports.iter().any(|e| e.name == name) {
            return Err(StackError::DuplicateExport(name));
        }
        self.exports.push(Export {
            name,
            value: value.into(),
        });
        Ok(())
    }

    /// Resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.index.get(name).map(|&i| &self.resources[i])
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resolve references into edges and check the result is a DAG
    pub fn build(&self) -> Result<DependencyGraph> {
        graph::build(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_returns_handle() {
        let mut stack = Stack::new("test");
        let vpc = stack.declare("network", "vpc", Config::new()).unwrap();

        assert_eq!(vpc.name(), "vpc");
        assert_eq!(vpc.kind(), "network");
        assert_eq!(reference(&vpc, "id"), Reference::new("vpc", "id"));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_duplicate_name() {
        let mut stack = Stack::new("test");
        stack.declare("network", "vpc", Config::new()).unwrap();

        let err = stack.declare("bucket", "vpc", Config::new()).unwrap_err();
        assert_eq!(err, StackError::DuplicateName("vpc".to_string()));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_duplicate_export() {
        let mut stack = Stack::new("test");
        let vpc = stack.declare("network", "vpc", Config::new()).unwrap();
        stack.export("VpcId", vpc.attr("id")).unwrap();

        let err = stack.export("VpcId", vpc.attr("cidr")).unwrap_err();
        assert_eq!(err, StackError::DuplicateExport("VpcId".to_string()));
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let mut stack = Stack::new("test");
        for name in ["c", "a", "b"] {
            stack.declare("bucket", name, Config::new()).unwrap();
        }
        let names: Vec<&str> = stack.resources().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert!(stack.get("a").is_some());
        assert!(stack.get("z").is_none());
    }
}
