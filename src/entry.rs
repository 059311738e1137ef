//! Builds emission-ready delta entries from graph nodes.

use std::sync::Arc;

use crate::error::DeltaError;
use crate::host::{ModuleResolver, ModuleTransformer};
use crate::ids::IdAllocator;
use crate::types::{DeltaEntry, DependencyEdge, EntryType, ModuleId, TransformOptions};

/// Transforms one [`DependencyEdge`] into an emittable [`DeltaEntry`].
///
/// Wrapping embeds the resolved id of every dependency, so the
/// allocator must be primed for the whole changed set before any build
/// starts; sibling builds may then run concurrently since they only
/// read the allocator. Never mutates the graph snapshot.
pub struct DeltaEntryBuilder<R, T> {
    resolver: Arc<R>,
    transformer: Arc<T>,
    ids: Arc<IdAllocator>,
}

impl<R: ModuleResolver, T: ModuleTransformer> DeltaEntryBuilder<R, T> {
    /// Create a builder over the given facades and allocator.
    pub fn new(resolver: Arc<R>, transformer: Arc<T>, ids: Arc<IdAllocator>) -> Self {
        Self {
            resolver,
            transformer,
            ids,
        }
    }

    /// Build the entry for one edge.
    ///
    /// Module-variant output is completed with registration parameters
    /// (own id plus dependency ids, in dependency resolution order);
    /// script/asset output passes through unwrapped. When minification
    /// is enabled the wrapped code and its map go through the external
    /// minifier. The entry keeps the edge output's own variant tag.
    pub async fn build(
        &self,
        edge: &DependencyEdge,
        options: &TransformOptions,
    ) -> Result<(ModuleId, DeltaEntry), DeltaError> {
        let name = self
            .resolver
            .display_name(&edge.path)
            .await
            .map_err(|e| DeltaError::resolution(&edge.path, e))?;

        let id = self.ids.id(&edge.path);
        let dependency_ids: Vec<ModuleId> = edge
            .dependencies
            .values()
            .map(|path| self.ids.id(path))
            .collect();

        let mut code = if edge.output.entry_type == EntryType::Module {
            wrap_module(&edge.output.code, id, &dependency_ids)
        } else {
            edge.output.code.clone()
        };
        let mut map = edge.output.map.clone();

        if options.minify {
            (code, map) = self
                .transformer
                .minify(&edge.path, code, map)
                .await
                .map_err(|e| DeltaError::minify(&edge.path, e))?;
        }

        let entry = DeltaEntry {
            code,
            id,
            map,
            name,
            path: edge.path.clone(),
            source: edge.output.source.clone(),
            entry_type: edge.output.entry_type,
        };
        Ok((id, entry))
    }
}

/// Complete a module's registration call with its id and dependency ids.
///
/// The transform pipeline emits an unparameterized define call,
/// `__d(function(...){...})`; this inserts `,<id>,[<dep ids>]` before
/// the closing parenthesis. Raw output that is not a call expression is
/// wrapped in a fresh define call instead.
pub(crate) fn wrap_module(code: &str, id: ModuleId, dependency_ids: &[ModuleId]) -> String {
    let deps = dependency_ids
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let trimmed = code.trim_end().trim_end_matches(';').trim_end();
    match trimmed.strip_suffix(')') {
        Some(call) => format!("{call},{id},[{deps}]);"),
        None => format!("__d(function(global,require,module,exports){{{code}}},{id},[{deps}]);"),
    }
}
