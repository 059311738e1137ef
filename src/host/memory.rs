//! In-memory host implementations for testing.
//!
//! Deterministic, scriptable stand-ins for the external graph-diff,
//! resolution and transform services. Iteration is BTreeMap-ordered so
//! identical scripts produce identical diffs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{GraphDiffService, ModuleResolver, ModuleTransformer};
use crate::types::{
    DependencyEdge, GraphDelta, GraphNode, GraphSnapshot, MapSegment, ModuleOutput, ModulePath,
    TransformOptions,
};

/// Error type for in-memory hosts.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// Shared, ordered record of host calls.
///
/// Tests hand one log to several hosts to assert cross-service call
/// ordering (e.g. that two builds never interleave).
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    /// Copy of all recorded events, in order.
    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Default)]
struct GraphServiceState {
    modules: BTreeMap<ModulePath, DependencyEdge>,
    pending_modified: Vec<ModulePath>,
    pending_deleted: Vec<ModulePath>,
    built_once: bool,
}

/// In-memory graph-diff service.
///
/// Holds a mutable module table; `set_module`/`remove_module` queue
/// changes that the next non-reset diff reports incrementally. A reset
/// diff (requested, or forced on first run) reports the whole table.
pub struct InMemoryGraphService {
    state: Mutex<GraphServiceState>,
    options: Mutex<TransformOptions>,
    fail_next: Mutex<Option<String>>,
    change_tx: broadcast::Sender<()>,
    ended: AtomicBool,
    log: CallLog,
}

impl InMemoryGraphService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    /// Create an empty service recording into `log`.
    pub fn with_log(log: CallLog) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(GraphServiceState::default()),
            options: Mutex::new(TransformOptions::default()),
            fail_next: Mutex::new(None),
            change_tx,
            ended: AtomicBool::new(false),
            log,
        }
    }

    /// Insert or update a module and queue it as modified.
    pub fn set_module(&self, edge: DependencyEdge) {
        let mut state = self.state.lock();
        let path = edge.path.clone();
        state.modules.insert(path.clone(), edge);
        if !state.pending_modified.contains(&path) {
            state.pending_modified.push(path);
        }
    }

    /// Remove a module and queue it as deleted.
    pub fn remove_module(&self, path: &ModulePath) {
        let mut state = self.state.lock();
        state.modules.remove(path);
        state.pending_modified.retain(|p| p != path);
        if !state.pending_deleted.contains(path) {
            state.pending_deleted.push(path.clone());
        }
    }

    /// Replace the transform options reported to the engine.
    pub fn set_transform_options(&self, options: TransformOptions) {
        *self.options.lock() = options;
    }

    /// Make the next `get_delta` call fail with `message`.
    pub fn fail_next_delta(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    /// Fire one change notification to subscribers.
    pub fn notify_change(&self) {
        let _ = self.change_tx.send(());
    }

    /// Whether `end` has been called.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn snapshot_locked(state: &GraphServiceState) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::new();
        for (path, edge) in &state.modules {
            snapshot.dependencies.insert(
                path.clone(),
                GraphNode {
                    dependencies: edge.dependencies.clone(),
                    inverse_dependencies: edge.inverse_dependencies.clone(),
                },
            );
        }
        // Derive inverse edges from forward edges so tests only have to
        // declare dependencies.
        let forward: Vec<(ModulePath, Vec<ModulePath>)> = state
            .modules
            .iter()
            .map(|(p, e)| (p.clone(), e.dependencies.values().cloned().collect()))
            .collect();
        for (from, targets) in forward {
            for target in targets {
                if let Some(node) = snapshot.dependencies.get_mut(&target) {
                    node.inverse_dependencies.insert(from.clone());
                }
            }
        }
        snapshot
    }
}

impl Default for InMemoryGraphService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphDiffService for InMemoryGraphService {
    type Error = HostError;

    async fn get_delta(&self, reset: bool) -> Result<GraphDelta, Self::Error> {
        self.log.record("graph.get_delta:start");
        if let Some(message) = self.fail_next.lock().take() {
            self.log.record("graph.get_delta:fail");
            return Err(HostError(message));
        }
        // Yield so concurrent callers would interleave here if the
        // engine failed to serialize them.
        tokio::task::yield_now().await;

        let delta = {
            let mut state = self.state.lock();
            let delta = if reset || !state.built_once {
                GraphDelta {
                    modified: state.modules.values().cloned().collect(),
                    deleted: Vec::new(),
                    reset: true,
                }
            } else {
                let modified = state
                    .pending_modified
                    .iter()
                    .filter_map(|p| state.modules.get(p).cloned())
                    .collect();
                GraphDelta {
                    modified,
                    deleted: state.pending_deleted.clone(),
                    reset: false,
                }
            };
            state.pending_modified.clear();
            state.pending_deleted.clear();
            state.built_once = true;
            delta
        };
        self.log.record("graph.get_delta:end");
        Ok(delta)
    }

    async fn get_graph(&self) -> Result<GraphSnapshot, Self::Error> {
        self.log.record("graph.get_graph");
        let state = self.state.lock();
        Ok(Self::snapshot_locked(&state))
    }

    fn transform_options(&self) -> TransformOptions {
        self.options.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.change_tx.subscribe()
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// In-memory module resolver.
pub struct InMemoryResolver {
    module_system: ModulePath,
    fail_on: Mutex<Option<ModulePath>>,
    log: CallLog,
}

impl InMemoryResolver {
    /// Create a resolver with the default module-system path.
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    /// Create a resolver recording into `log`.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            module_system: ModulePath::new("/lib/require.js"),
            fail_on: Mutex::new(None),
            log,
        }
    }

    /// Make resolution of `path` fail.
    pub fn fail_on(&self, path: ModulePath) {
        *self.fail_on.lock() = Some(path);
    }

    fn check_failure(&self, path: &ModulePath) -> Result<(), HostError> {
        if self.fail_on.lock().as_ref() == Some(path) {
            return Err(HostError(format!("cannot resolve {path}")));
        }
        Ok(())
    }
}

impl Default for InMemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleResolver for InMemoryResolver {
    type Error = HostError;

    async fn display_name(&self, path: &ModulePath) -> Result<String, Self::Error> {
        self.check_failure(path)?;
        Ok(path.file_stem().to_string())
    }

    async fn synthetic_module(&self, file: &ModulePath) -> Result<DependencyEdge, Self::Error> {
        self.log.record(format!("resolver.synthetic:{file}"));
        self.check_failure(file)?;
        Ok(DependencyEdge::synthetic(
            file.clone(),
            ModuleOutput::script(String::new(), String::new()),
        ))
    }

    fn prelude_source(&self, dev: bool) -> String {
        format!("var __BUNDLE_START_TIME__=this.nativePerformanceNow?nativePerformanceNow():Date.now(),__DEV__={dev};")
    }

    fn module_system_path(&self) -> ModulePath {
        self.module_system.clone()
    }
}

/// In-memory transformer/minifier.
///
/// `read_module` serves registered sources (or a placeholder comment);
/// `minify` deterministically collapses whitespace so tests can assert
/// on the exact minified output.
pub struct InMemoryTransformer {
    sources: Mutex<BTreeMap<ModulePath, String>>,
    fail_read_on: Mutex<Option<ModulePath>>,
    fail_minify_on: Mutex<Option<ModulePath>>,
    log: CallLog,
}

impl InMemoryTransformer {
    /// Create an empty transformer.
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    /// Create a transformer recording into `log`.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            sources: Mutex::new(BTreeMap::new()),
            fail_read_on: Mutex::new(None),
            fail_minify_on: Mutex::new(None),
            log,
        }
    }

    /// Register source code served by `read_module`.
    pub fn set_source(&self, path: ModulePath, code: impl Into<String>) {
        self.sources.lock().insert(path, code.into());
    }

    /// Make `read_module` fail for `path`.
    pub fn fail_read_on(&self, path: ModulePath) {
        *self.fail_read_on.lock() = Some(path);
    }

    /// Make `minify` fail for `path`.
    pub fn fail_minify_on(&self, path: ModulePath) {
        *self.fail_minify_on.lock() = Some(path);
    }
}

impl Default for InMemoryTransformer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleTransformer for InMemoryTransformer {
    type Error = HostError;

    async fn read_module(
        &self,
        path: &ModulePath,
        _options: &TransformOptions,
    ) -> Result<ModuleOutput, Self::Error> {
        self.log.record(format!("transformer.read:{path}"));
        if self.fail_read_on.lock().as_ref() == Some(path) {
            return Err(HostError(format!("cannot transform {path}")));
        }
        let code = self
            .sources
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_else(|| format!("// {path}"));
        Ok(ModuleOutput::script(code.clone(), code))
    }

    async fn minify(
        &self,
        path: &ModulePath,
        code: String,
        map: Vec<MapSegment>,
    ) -> Result<(String, Vec<MapSegment>), Self::Error> {
        self.log.record(format!("transformer.minify:{path}"));
        if self.fail_minify_on.lock().as_ref() == Some(path) {
            return Err(HostError(format!("cannot minify {path}")));
        }
        let minified = code.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok((minified, map))
    }
}
