//! External collaborator interfaces.
//!
//! Graph construction, per-file transformation and module resolution
//! live outside this crate; the engine consumes them through these
//! traits. Implementations must guarantee deterministic enumeration
//! order where the trait docs require it.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{DependencyEdge, GraphDelta, GraphSnapshot, MapSegment, ModuleOutput, ModulePath, TransformOptions};

/// Graph construction and change detection service.
///
/// The sole writer of graph structure. The engine only calls it from
/// within one serialized build episode, never concurrently.
#[async_trait]
pub trait GraphDiffService: Send + Sync {
    /// Error type for diff operations.
    type Error: std::error::Error + Send + Sync;

    /// Compute the changes since the previous diff request.
    ///
    /// `modified` must be enumerated in a stable order across identical
    /// diffs; the engine primes module ids in this order. The returned
    /// `reset` flag is authoritative and may be true even when `reset`
    /// was not requested (first run, structural invalidation).
    async fn get_delta(&self, reset: bool) -> Result<GraphDelta, Self::Error>;

    /// Current full graph snapshot.
    async fn get_graph(&self) -> Result<GraphSnapshot, Self::Error>;

    /// Transform options in effect for this graph.
    fn transform_options(&self) -> TransformOptions;

    /// Subscribe to file-change notifications (no payload).
    fn subscribe(&self) -> broadcast::Receiver<()>;

    /// Release underlying watchers. Must tolerate double invocation.
    async fn end(&self);
}

/// Module-resolution facade: display names and synthetic modules.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// Error type for resolution operations.
    type Error: std::error::Error + Send + Sync;

    /// Human-readable display name for a path.
    async fn display_name(&self, path: &ModulePath) -> Result<String, Self::Error>;

    /// Synthesize a zero-dependency edge for a framing module
    /// (module system, polyfill). Its output is filled in by a
    /// subsequent [`ModuleTransformer::read_module`] call.
    async fn synthetic_module(&self, file: &ModulePath) -> Result<DependencyEdge, Self::Error>;

    /// Startup banner source. Content depends only on the dev flag.
    fn prelude_source(&self, dev: bool) -> String;

    /// Path of the module-system bootstrap script.
    fn module_system_path(&self) -> ModulePath;
}

/// Transform/minify services for single files.
#[async_trait]
pub trait ModuleTransformer: Send + Sync {
    /// Error type for transform operations.
    type Error: std::error::Error + Send + Sync;

    /// Read and transform a file into raw output.
    async fn read_module(
        &self,
        path: &ModulePath,
        options: &TransformOptions,
    ) -> Result<ModuleOutput, Self::Error>;

    /// Minify wrapped code, possibly rewriting its map segments.
    async fn minify(
        &self,
        path: &ModulePath,
        code: String,
        map: Vec<MapSegment>,
    ) -> Result<(String, Vec<MapSegment>), Self::Error>;
}

pub use memory::{InMemoryGraphService, InMemoryResolver, InMemoryTransformer};
