//! Read-only dependency queries over the engine's graph snapshot.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::DeltaEngine;
use crate::error::DeltaError;
use crate::host::{GraphDiffService, ModuleResolver, ModuleTransformer};
use crate::types::{GraphSnapshot, ModuleId, ModulePath};

impl<G, R, T> DeltaEngine<G, R, T>
where
    G: GraphDiffService,
    R: ModuleResolver,
    T: ModuleTransformer,
{
    /// Transitive dependency set of `path`, excluding `path` itself.
    ///
    /// Well-defined on cyclic graphs: a visited guard expands each
    /// reachable path exactly once. Triggers one internal non-resetting
    /// build if the engine has never built.
    pub async fn dependencies_of(
        &self,
        path: &ModulePath,
    ) -> Result<BTreeSet<ModulePath>, DeltaError> {
        self.ensure_built().await?;
        let snapshot = self.graph.get_graph().await.map_err(DeltaError::graph_diff)?;
        if !snapshot.contains(path) {
            return Err(DeltaError::EntryNotFound(path.clone()));
        }
        Ok(collect_dependencies(&snapshot, path))
    }

    /// For every built path in the snapshot, its id mapped to the ids
    /// of the paths depending on it, in the snapshot's inverse-edge
    /// enumeration order.
    ///
    /// Ids are assigned exclusively inside build episodes, so a path
    /// added to the graph after the last build has no id yet and is
    /// omitted until the next build assigns one. Queries never mint
    /// ids: allocation order belongs to the diff, not to a racing read.
    pub async fn inverse_dependencies(
        &self,
    ) -> Result<BTreeMap<ModuleId, Vec<ModuleId>>, DeltaError> {
        self.ensure_built().await?;
        let snapshot = self.graph.get_graph().await.map_err(DeltaError::graph_diff)?;

        let mut result = BTreeMap::new();
        for (path, node) in &snapshot.dependencies {
            let Some(id) = self.ids.known_id(path) else {
                continue;
            };
            let dependents: Vec<ModuleId> = node
                .inverse_dependencies
                .iter()
                .filter_map(|dependent| self.ids.known_id(dependent))
                .collect();
            result.insert(id, dependents);
        }
        Ok(result)
    }

    async fn ensure_built(&self) -> Result<(), DeltaError> {
        if self.last_sequence_id().is_none() {
            self.get_delta(None).await?;
        }
        Ok(())
    }
}

/// Depth-first reachability over a snapshot, excluding the root.
fn collect_dependencies(snapshot: &GraphSnapshot, root: &ModulePath) -> BTreeSet<ModulePath> {
    let mut visited: BTreeSet<ModulePath> = BTreeSet::new();
    let mut stack: Vec<ModulePath> = snapshot
        .node(root)
        .map(|node| node.dependencies.values().cloned().collect())
        .unwrap_or_default();

    while let Some(path) = stack.pop() {
        if path == *root || !visited.insert(path.clone()) {
            continue;
        }
        if let Some(node) = snapshot.node(&path) {
            stack.extend(node.dependencies.values().cloned());
        }
    }
    visited
}
