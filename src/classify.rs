//! Read-only questions asked of a finished reference graph.

use crate::dependency_graph::{ReferenceGraph, Vertex};
use petgraph::Direction;
use serde::Serialize;
use std::collections::HashSet;

/// Vertices nothing else references.
pub fn roots(graph: &ReferenceGraph) -> Vec<&Vertex> {
    graph
        .node_indices()
        .filter(|&node| graph.neighbors_directed(node, Direction::Incoming).next().is_none())
        .map(|node| &graph[node])
        .collect()
}

/// Unresolved, but matched an exclusion pattern.
pub fn missing_and_excluded(graph: &ReferenceGraph) -> Vec<&Vertex> {
    graph.node_weights().filter(|v| !v.exists && v.excluded).collect()
}

/// Unresolved and not excluded: these fail the check.
pub fn failures(graph: &ReferenceGraph) -> Vec<&Vertex> {
    graph.node_weights().filter(|v| !v.exists && !v.excluded).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RootComparison {
    /// Expected names that are not roots.
    pub missing_roots: Vec<String>,
    /// Roots whose name was not expected.
    pub unexpected_roots: Vec<Vertex>,
}

impl RootComparison {
    pub fn is_clean(&self) -> bool {
        self.missing_roots.is_empty() && self.unexpected_roots.is_empty()
    }
}

/// Case-insensitive difference between expected root names and actual roots.
pub fn compare_expected_roots(expected: &[String], actual_roots: &[&Vertex]) -> RootComparison {
    let expected_lower: HashSet<String> = expected.iter().map(|n| n.trim().to_lowercase()).collect();
    let actual_lower: HashSet<String> = actual_roots.iter().map(|v| v.name.to_lowercase()).collect();

    let mut seen = HashSet::new();
    let missing_roots = expected
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| !actual_lower.contains(&n.to_lowercase()))
        .filter(|n| seen.insert(n.to_lowercase()))
        .map(str::to_string)
        .collect();

    let unexpected_roots = actual_roots
        .iter()
        .filter(|v| !expected_lower.contains(&v.name.to_lowercase()))
        .map(|v| (*v).clone())
        .collect();

    RootComparison {
        missing_roots,
        unexpected_roots,
    }
}

/// Everything the report needs, computed once.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub roots: Vec<Vertex>,
    pub missing_but_excluded: Vec<Vertex>,
    pub failures: Vec<Vertex>,
    pub root_comparison: Option<RootComparison>,
}

impl Classification {
    /// Root comparison only happens when some roots were expected.
    pub fn of(graph: &ReferenceGraph, expected_roots: &[String]) -> Self {
        let actual_roots = roots(graph);
        let root_comparison = if expected_roots.iter().any(|r| !r.trim().is_empty()) {
            Some(compare_expected_roots(expected_roots, &actual_roots))
        } else {
            None
        };

        Self {
            roots: actual_roots.into_iter().cloned().collect(),
            missing_but_excluded: missing_and_excluded(graph).into_iter().cloned().collect(),
            failures: failures(graph).into_iter().cloned().collect(),
            root_comparison,
        }
    }

    /// Failures plus missing and unexpected roots; zero means clean.
    pub fn exit_code(&self) -> usize {
        let roots = self
            .root_comparison
            .as_ref()
            .map(|c| c.missing_roots.len() + c.unexpected_roots.len())
            .unwrap_or(0);
        self.failures.len() + roots
    }
}
