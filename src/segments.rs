//! Prepend and append segment assembly.
//!
//! The two framing segments of a bundle: prelude + polyfills + module
//! system that must run first, and startup `require` calls + optional
//! source-map comment that must run last. Both are only computed when
//! a build resets; incremental responses carry empty segments.

use std::sync::Arc;

use crate::entry::DeltaEntryBuilder;
use crate::error::DeltaError;
use crate::host::{ModuleResolver, ModuleTransformer};
use crate::ids::IdAllocator;
use crate::types::{
    DeltaEntries, DeltaEntry, EntryType, GraphSnapshot, ModuleId, ModulePath, TransformOptions,
};

/// Synthetic path of the prelude entry.
pub const PRELUDE_PATH: &str = "/__prelude__";

/// Synthetic path of the source-map comment entry.
pub const SOURCE_MAP_COMMENT_PATH: &str = "/sourcemap.map";

/// Bundle-level configuration supplied by the front-end.
#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Entry point of the bundle; its startup require runs last.
    pub entry_file: ModulePath,
    /// Configured polyfill modules, loaded in this order.
    pub polyfill_modules: Vec<ModulePath>,
    /// Modules required before the entry point, in this order. Names
    /// absent from the graph snapshot are skipped silently.
    pub run_before_main: Vec<ModulePath>,
    /// Platform-filtered polyfills injected for the entry point.
    pub platform_polyfills: Vec<ModulePath>,
    /// When set, the append segment ends with a sourceMappingURL comment.
    pub source_map_url: Option<String>,
}

impl BundleOptions {
    /// Options for a bundle rooted at `entry_file`, with no polyfills.
    pub fn new(entry_file: ModulePath) -> Self {
        Self {
            entry_file,
            polyfill_modules: Vec::new(),
            run_before_main: Vec::new(),
            platform_polyfills: Vec::new(),
            source_map_url: None,
        }
    }
}

/// Assembles the two framing segments.
pub(crate) struct SegmentAssembler<R, T> {
    resolver: Arc<R>,
    transformer: Arc<T>,
    builder: DeltaEntryBuilder<R, T>,
    ids: Arc<IdAllocator>,
    options: BundleOptions,
}

impl<R: ModuleResolver, T: ModuleTransformer> SegmentAssembler<R, T> {
    pub(crate) fn new(
        resolver: Arc<R>,
        transformer: Arc<T>,
        ids: Arc<IdAllocator>,
        options: BundleOptions,
    ) -> Self {
        let builder = DeltaEntryBuilder::new(Arc::clone(&resolver), Arc::clone(&transformer), Arc::clone(&ids));
        Self {
            resolver,
            transformer,
            builder,
            ids,
            options,
        }
    }

    /// Build the prepend segment.
    ///
    /// Order is a contract with the runtime loader: prelude, module
    /// system, configured polyfills, platform polyfills. The prelude id
    /// is the first id requested in this function, so on a fresh
    /// allocator it also sorts first numerically.
    pub(crate) async fn prepend(
        &self,
        transform: &TransformOptions,
    ) -> Result<DeltaEntries, DeltaError> {
        let mut entries = DeltaEntries::new();

        let prelude_path = ModulePath::new(PRELUDE_PATH);
        let prelude_id = self.ids.id(&prelude_path);
        let code = self.resolver.prelude_source(transform.dev);
        entries.insert(
            prelude_id,
            DeltaEntry {
                code: code.clone(),
                id: prelude_id,
                map: Vec::new(),
                name: "__prelude__".to_string(),
                path: prelude_path,
                source: code,
                entry_type: EntryType::Script,
            },
        );

        let mut framing = vec![self.resolver.module_system_path()];
        framing.extend(self.options.polyfill_modules.iter().cloned());
        framing.extend(self.options.platform_polyfills.iter().cloned());

        // Sequential on purpose: insertion order is the contract here.
        for path in framing {
            let mut edge = self
                .resolver
                .synthetic_module(&path)
                .await
                .map_err(|e| DeltaError::resolution(&path, e))?;
            edge.output = self
                .transformer
                .read_module(&path, transform)
                .await
                .map_err(|e| DeltaError::transform(&path, e))?;
            let (id, entry) = self.builder.build(&edge, transform).await?;
            entries.insert(id, entry);
        }

        Ok(entries)
    }

    /// Build the append segment.
    ///
    /// One startup require per run-before-main module present in the
    /// snapshot, then the entry file's own require, then the optional
    /// source-map comment.
    pub(crate) async fn append(&self, snapshot: &GraphSnapshot) -> Result<DeltaEntries, DeltaError> {
        let mut entries = DeltaEntries::new();

        let mut to_require: Vec<ModulePath> = self
            .options
            .run_before_main
            .iter()
            .filter(|path| snapshot.contains(path))
            .cloned()
            .collect();
        to_require.push(self.options.entry_file.clone());

        for path in to_require {
            let id = self.ids.id(&path);
            entries.insert(id, require_entry(&path, id));
        }

        if let Some(url) = &self.options.source_map_url {
            let path = ModulePath::new(SOURCE_MAP_COMMENT_PATH);
            let id = self.ids.id(&path);
            let code = format!("//# sourceMappingURL={url}");
            entries.insert(
                id,
                DeltaEntry {
                    code: code.clone(),
                    id,
                    map: Vec::new(),
                    name: "sourcemap.map".to_string(),
                    path,
                    source: code,
                    entry_type: EntryType::Comment,
                },
            );
        }

        Ok(entries)
    }
}

fn require_entry(path: &ModulePath, id: ModuleId) -> DeltaEntry {
    DeltaEntry {
        code: format!("require({id});"),
        id,
        map: Vec::new(),
        name: format!("require-{}", path.file_stem()),
        path: ModulePath::new(format!("/require-{}", path.as_str().trim_start_matches('/'))),
        source: String::new(),
        entry_type: EntryType::Require,
    }
}
