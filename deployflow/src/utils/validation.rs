//! Validation utilities for pipeline topology.
//!
//! Name checks follow the character sets the managed pipeline service
//! accepts, and `validate_dag` orders stages while rejecting cycles.

use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

fn resource_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9.@_-]{1,100}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn artifact_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]{1,100}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Returns true if `name` is usable as a pipeline, stage or action name.
#[must_use]
pub fn is_valid_resource_name(name: &str) -> bool {
    resource_name_pattern().is_match(name)
}

/// Returns true if `name` is usable as an artifact name.
#[must_use]
pub fn is_valid_artifact_name(name: &str) -> bool {
    artifact_name_pattern().is_match(name)
}

/// Validates that dependencies form a DAG and returns a topological order.
///
/// `nodes` lists every node in declaration order; `deps` maps a node to the
/// nodes it depends on. Ties are broken by declaration order, so a chain
/// declared in order comes back unchanged.
pub fn validate_dag(
    nodes: &[String],
    deps: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, CycleError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut order = Vec::new();
    let mut path = Vec::new();

    fn dfs(
        node: &str,
        deps: &BTreeMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
        order: &mut Vec<String>,
        path: &mut Vec<String>,
    ) -> Result<(), Vec<String>> {
        if in_stack.contains(node) {
            let start_idx = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle_path: Vec<String> = path[start_idx..].to_vec();
            cycle_path.push(node.to_string());
            return Err(cycle_path);
        }

        if visited.contains(node) {
            return Ok(());
        }

        visited.insert(node.to_string());
        in_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(node_deps) = deps.get(node) {
            for dep in node_deps {
                dfs(dep, deps, visited, in_stack, order, path)?;
            }
        }

        in_stack.remove(node);
        path.pop();
        order.push(node.to_string());
        Ok(())
    }

    for node in nodes {
        dfs(node, deps, &mut visited, &mut in_stack, &mut order, &mut path)
            .map_err(|cycle_path| CycleError { cycle_path })?;
    }

    Ok(order)
}

/// Error indicating a cycle was detected in the DAG.
#[derive(Debug, Clone)]
pub struct CycleError {
    /// The path that forms the cycle.
    pub cycle_path: Vec<String>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cycle detected: {}", self.cycle_path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_resource_names() {
        assert!(is_valid_resource_name("CloudFormation_Deploy"));
        assert!(is_valid_resource_name("sample-pipeline.v1@prod"));
        assert!(!is_valid_resource_name(""));
        assert!(!is_valid_resource_name("has space"));
        assert!(!is_valid_resource_name(&"x".repeat(101)));
    }

    #[test]
    fn test_artifact_names() {
        assert!(is_valid_artifact_name("source_output"));
        assert!(!is_valid_artifact_name("output.data"));
        assert!(!is_valid_artifact_name("a/b"));
    }

    #[test]
    fn test_chain_keeps_declaration_order() {
        let nodes = names(&["Source", "Build", "Deploy"]);
        let mut deps = BTreeMap::new();
        deps.insert("Build".to_string(), names(&["Source"]));
        deps.insert("Deploy".to_string(), names(&["Build"]));

        let order = validate_dag(&nodes, &deps).unwrap();
        assert_eq!(order, nodes);
    }

    #[test]
    fn test_cycle_detected() {
        let nodes = names(&["A", "B"]);
        let mut deps = BTreeMap::new();
        deps.insert("A".to_string(), names(&["B"]));
        deps.insert("B".to_string(), names(&["A"]));

        let err = validate_dag(&nodes, &deps).unwrap_err();
        assert_eq!(err.cycle_path, names(&["A", "B", "A"]));
    }
}
