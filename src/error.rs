//! Error types for delta builds.

use crate::types::ModulePath;

/// Error type for delta builds and snapshot queries.
///
/// Every failure aborts the whole build: a partial delta would
/// desynchronize the client's module table. The single-flight gate is
/// released and the last sequence id is left unchanged on failure.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// External graph-diff service failed.
    #[error("Graph diff failure: {0}")]
    GraphDiff(String),
    /// Module-resolution facade could not resolve a path.
    #[error("Resolution failure for {path}: {message}")]
    Resolution {
        /// Path being resolved.
        path: ModulePath,
        /// Underlying service error.
        message: String,
    },
    /// External transform service failed on one module.
    #[error("Transform failure for {path}: {message}")]
    Transform {
        /// Path being transformed.
        path: ModulePath,
        /// Underlying service error.
        message: String,
    },
    /// External minify service failed on one module.
    #[error("Minify failure for {path}: {message}")]
    Minify {
        /// Path being minified.
        path: ModulePath,
        /// Underlying service error.
        message: String,
    },
    /// A queried path is not part of the current graph snapshot.
    #[error("Module not found in graph: {0}")]
    EntryNotFound(ModulePath),
}

impl DeltaError {
    /// Wrap a graph-diff service error.
    pub fn graph_diff<E: std::error::Error>(e: E) -> Self {
        Self::GraphDiff(e.to_string())
    }

    /// Wrap a resolution error for a path.
    pub fn resolution<E: std::error::Error>(path: &ModulePath, e: E) -> Self {
        Self::Resolution {
            path: path.clone(),
            message: e.to_string(),
        }
    }

    /// Wrap a transform error for a path.
    pub fn transform<E: std::error::Error>(path: &ModulePath, e: E) -> Self {
        Self::Transform {
            path: path.clone(),
            message: e.to_string(),
        }
    }

    /// Wrap a minify error for a path.
    pub fn minify<E: std::error::Error>(path: &ModulePath, e: E) -> Self {
        Self::Minify {
            path: path.clone(),
            message: e.to_string(),
        }
    }
}
