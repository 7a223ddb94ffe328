//! Dependency graph construction
//!
//! Every reference and ordering hint becomes an edge from the dependent to
//! the resource it depends on. Broken references and cycles are rejected
//! here, before anything is planned or provisioned.

use crate::error::{Result, StackError};
use crate::model::{Resource, kind, unknown_reference};
use crate::stack::{Export, Stack};
use std::collections::{BTreeSet, HashMap};

/// Immutable DAG of the resources of one stack
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    stack: String,
    resources: Vec<Resource>,
    exports: Vec<Export>,
    index: HashMap<String, usize>,
    /// `dependencies[i]` = resources `i` depends on
    dependencies: Vec<BTreeSet<usize>>,
    /// `dependents[i]` = resources depending on `i`
    dependents: Vec<BTreeSet<usize>>,
}

/// Build the dependency graph of a stack
pub fn build(stack: &Stack) -> Result<DependencyGraph> {
    let resources = stack.resources().to_vec();
    let index: HashMap<String, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.clone(), i))
        .collect();

    let mut dependencies = vec![BTreeSet::new(); resources.len()];
    let mut dependents = vec![BTreeSet::new(); resources.len()];

    for (i, resource) in resources.iter().enumerate() {
        for (_, reference) in resource.references() {
            let Some(&target) = index.get(&reference.resource) else {
                return Err(unknown_reference(
                    &resource.name,
                    reference,
                    format!("no resource named '{}'", reference.resource),
                ));
            };
            let target_kind = &resources[target].kind;
            if !kind::produces(target_kind, &reference.attribute) {
                return Err(unknown_reference(
                    &resource.name,
                    reference,
                    format!(
                        "kind '{}' has no output attribute '{}'",
                        target_kind, reference.attribute
                    ),
                ));
            }
            dependencies[i].insert(target);
            dependents[target].insert(i);
        }

        for hint in &resource.depends_on {
            let Some(&target) = index.get(hint) else {
                return Err(StackError::UnknownReference {
                    referrer: resource.name.clone(),
                    reference: format!("depends_on {}", hint),
                    reason: format!("no resource named '{}'", hint),
                });
            };
            dependencies[i].insert(target);
            dependents[target].insert(i);
        }
    }

    for export in stack.exports() {
        for reference in export.value.references() {
            let referrer = format!("export {}", export.name);
            let Some(&target) = index.get(&reference.resource) else {
                return Err(unknown_reference(
                    &referrer,
                    reference,
                    format!("no resource named '{}'", reference.resource),
                ));
            };
            if !kind::produces(&resources[target].kind, &reference.attribute) {
                return Err(unknown_reference(
                    &referrer,
                    reference,
                    format!(
                        "kind '{}' has no output attribute '{}'",
                        resources[target].kind, reference.attribute
                    ),
                ));
            }
        }
    }

    let graph = DependencyGraph {
        stack: stack.name().to_string(),
        resources,
        exports: stack.exports().to_vec(),
        index,
        dependencies,
        dependents,
    };

    if let Some(cycle) = graph.find_cycle() {
        return Err(StackError::Cycle { cycle });
    }

    tracing::debug!(
        stack = %graph.stack,
        resources = graph.len(),
        edges = graph.edge_count(),
        "Built dependency graph"
    );
    Ok(graph)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl DependencyGraph {
    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(BTreeSet::len).sum()
    }

    /// Resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.index.get(name).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names of the resources `name` depends on, in declaration order
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.dependencies)
    }

    /// Names of the resources depending on `name`, in declaration order
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.dependents)
    }

    fn neighbours<'a>(&'a self, name: &str, edges: &[BTreeSet<usize>]) -> Vec<&'a str> {
        match self.index.get(name) {
            Some(&i) => edges[i]
                .iter()
                .map(|&j| self.resources[j].name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Group resources into waves: a wave holds every resource whose
    /// dependencies all sit in earlier waves, in declaration order.
    pub fn waves(&self) -> Vec<Vec<&Resource>> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut current: Vec<usize> = (0..self.len()).filter(|&i| remaining[i] == 0).collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for &i in &current {
                for &d in &self.dependents[i] {
                    remaining[d] -= 1;
                    if remaining[d] == 0 {
                        next.insert(d);
                    }
                }
            }
            waves.push(current.iter().map(|&i| &self.resources[i]).collect());
            current = next.into_iter().collect();
        }

        waves
    }

    /// Topological apply order: waves flattened
    pub fn apply_order(&self) -> Vec<&Resource> {
        self.waves().into_iter().flatten().collect()
    }

    /// Depth-first search with a recursion stack; returns the first cycle
    /// found as a list of names with the start repeated at the end.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut path = Vec::new();

        for start in 0..self.len() {
            if marks[start] == Mark::Unvisited
                && let Some(cycle) = self.visit(start, &mut marks, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<String>> {
        marks[node] = Mark::OnStack;
        path.push(node);

        for &next in &self.dependencies[node] {
            match marks[next] {
                Mark::OnStack => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|&i| self.resources[i].name.clone())
                        .collect();
                    cycle.push(self.resources[next].name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(next, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Reference, Resource};

    fn names(resources: &[&Resource]) -> Vec<String> {
        resources.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_vpc_bucket_database_order() {
        let mut stack = Stack::new("test");
        let vpc = stack.add(Resource::new("network", "vpc")).unwrap();
        stack
            .add(Resource::new("database", "database").with("vpc", vpc.attr("id")))
            .unwrap();
        stack.add(Resource::new("bucket", "bucket")).unwrap();

        let graph = stack.build().unwrap();
        assert_eq!(names(&graph.apply_order()), vec!["vpc", "bucket", "database"]);
        assert_eq!(graph.dependencies_of("database"), vec!["vpc"]);
        assert_eq!(graph.dependents_of("vpc"), vec!["database"]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_dependency_before_dependent() {
        // declared in reverse dependency order on purpose
        let mut stack = Stack::new("test");
        stack
            .add(Resource::new("alarm", "alarm").with("service", Reference::new("service", "arn")))
            .unwrap();
        stack
            .add(
                Resource::new("service", "service")
                    .with("cluster", Reference::new("cluster", "arn"))
                    .with("task", Reference::new("task", "arn")),
            )
            .unwrap();
        stack
            .add(
                Resource::new("task-definition", "task")
                    .with("bucket", Reference::new("bucket", "arn")),
            )
            .unwrap();
        stack
            .add(Resource::new("cluster", "cluster").with("vpc", Reference::new("vpc", "id")))
            .unwrap();
        stack.add(Resource::new("bucket", "bucket")).unwrap();
        stack.add(Resource::new("network", "vpc")).unwrap();

        let graph = stack.build().unwrap();
        let order = names(&graph.apply_order());
        let position = |n: &str| order.iter().position(|o| o == n).unwrap();

        for resource in graph.resources() {
            for dep in resource.dependencies() {
                assert!(
                    position(&dep) < position(&resource.name),
                    "{} must come before {}",
                    dep,
                    resource.name
                );
            }
        }
    }

    #[test]
    fn test_waves_keep_declaration_order() {
        let mut stack = Stack::new("test");
        stack.add(Resource::new("bucket", "b")).unwrap();
        stack.add(Resource::new("bucket", "a")).unwrap();
        stack
            .add(
                Resource::new("distribution", "cdn")
                    .with("origin", Reference::new("a", "domain_name")),
            )
            .unwrap();
        stack.add(Resource::new("network", "c")).unwrap();

        let graph = stack.build().unwrap();
        let waves: Vec<Vec<String>> = graph.waves().iter().map(|w| names(w)).collect();
        assert_eq!(waves, vec![vec!["b", "a", "c"], vec!["cdn"]]);
    }

    #[test]
    fn test_unknown_resource() {
        let mut stack = Stack::new("test");
        stack
            .add(Resource::new("database", "db").with("vpc", Reference::new("vcp", "id")))
            .unwrap();

        match stack.build().unwrap_err() {
            StackError::UnknownReference { referrer, reference, .. } => {
                assert_eq!(referrer, "db");
                assert_eq!(reference, "${vcp.id}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_attribute() {
        let mut stack = Stack::new("test");
        stack.add(Resource::new("network", "vpc")).unwrap();
        stack
            .add(Resource::new("database", "db").with("vpc", Reference::new("vpc", "endpoint")))
            .unwrap();

        let err = stack.build().unwrap_err();
        assert!(err.to_string().contains("kind 'network' has no output attribute 'endpoint'"));
    }

    #[test]
    fn test_unknown_hint() {
        let mut stack = Stack::new("test");
        stack.add(Resource::new("bucket", "assets").depends_on("ghost")).unwrap();

        assert!(matches!(
            stack.build().unwrap_err(),
            StackError::UnknownReference { .. }
        ));
    }

    #[test]
    fn test_unknown_export_reference() {
        let mut stack = Stack::new("test");
        stack.add(Resource::new("bucket", "assets")).unwrap();
        stack.export("Lb", Reference::new("service", "load_balancer_dns")).unwrap();

        match stack.build().unwrap_err() {
            StackError::UnknownReference { referrer, .. } => assert_eq!(referrer, "export Lb"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let mut stack = Stack::new("test");
        stack
            .add(Resource::new("queue", "a").with("peer", Reference::new("b", "url")))
            .unwrap();
        stack
            .add(Resource::new("queue", "b").with("peer", Reference::new("a", "url")))
            .unwrap();

        let err = stack.build().unwrap_err();
        assert_eq!(
            err,
            StackError::Cycle {
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            }
        );
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_cycle_reported_from_its_entry() {
        let mut stack = Stack::new("test");
        stack.add(Resource::new("network", "vpc")).unwrap();
        stack
            .add(
                Resource::new("queue", "x")
                    .with("vpc", Reference::new("vpc", "id"))
                    .depends_on("z"),
            )
            .unwrap();
        stack.add(Resource::new("queue", "y").depends_on("x")).unwrap();
        stack.add(Resource::new("queue", "z").depends_on("y")).unwrap();

        match stack.build().unwrap_err() {
            StackError::Cycle { cycle } => assert_eq!(cycle, vec!["x", "z", "y", "x"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut stack = Stack::new("test");
        stack
            .add(Resource::new("queue", "loop").with("me", Reference::new("loop", "id")))
            .unwrap();

        assert!(matches!(stack.build().unwrap_err(), StackError::Cycle { .. }));
    }

    #[test]
    fn test_empty_stack() {
        let graph = Stack::new("empty").build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.waves().is_empty());
    }
}
