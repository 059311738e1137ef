//! Dependency edges and graph snapshots.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::module::{ModuleOutput, ModulePath};

/// Full build record of one graph node.
///
/// Carries the node's path, its resolved dependencies (keyed by the
/// name used in the importing code, in resolution order), the set of
/// paths depending on it, and its raw transform output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Path of this node.
    pub path: ModulePath,
    /// Dependency name -> imported path, in resolution order.
    pub dependencies: IndexMap<String, ModulePath>,
    /// Paths that depend on this node.
    pub inverse_dependencies: BTreeSet<ModulePath>,
    /// Raw transform output.
    pub output: ModuleOutput,
}

impl DependencyEdge {
    /// Create a new edge.
    pub fn new(
        path: ModulePath,
        dependencies: IndexMap<String, ModulePath>,
        output: ModuleOutput,
    ) -> Self {
        Self {
            path,
            dependencies,
            inverse_dependencies: BTreeSet::new(),
            output,
        }
    }

    /// Create a zero-dependency edge (synthetic modules, polyfills).
    pub fn synthetic(path: ModulePath, output: ModuleOutput) -> Self {
        Self::new(path, IndexMap::new(), output)
    }
}

/// Dependency relations of one node inside a [`GraphSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Dependency name -> imported path, in resolution order.
    pub dependencies: IndexMap<String, ModulePath>,
    /// Paths that depend on this node.
    pub inverse_dependencies: BTreeSet<ModulePath>,
}

/// Read-only view of the full dependency graph at one point in time.
///
/// Uses `BTreeMap` so enumeration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Every known path and its dependency relations.
    pub dependencies: BTreeMap<ModulePath, GraphNode>,
}

impl GraphSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the snapshot contains a path.
    pub fn contains(&self, path: &ModulePath) -> bool {
        self.dependencies.contains_key(path)
    }

    /// Dependency relations of a path, if present.
    pub fn node(&self, path: &ModulePath) -> Option<&GraphNode> {
        self.dependencies.get(path)
    }

    /// Number of nodes in the snapshot.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the snapshot has no nodes.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Result of one graph diff: what changed since the previous request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    /// Added or modified nodes, in the diff service's enumeration order.
    ///
    /// This order drives id priming and must be stable across identical
    /// diffs for reproducible id assignment.
    pub modified: Vec<DependencyEdge>,
    /// Paths removed from the graph.
    pub deleted: Vec<ModulePath>,
    /// Authoritative reset flag. The diff service may force a reset
    /// (first run, structural invalidation) even when none was requested.
    pub reset: bool,
}
