//! # delta-bundler
//!
//! Incremental delta-bundling core of a module bundler.
//!
//! Given a dependency graph that changes over time, the engine answers
//! one question per rebuild:
//!
//! > What is the minimal, deterministic set of changes the client must
//! > apply — and does it first have to throw everything away?
//!
//! ## Core Contract
//!
//! 1. Stable, monotone module ids: identical diffs assign identical ids
//! 2. A sequence-id handshake detects client/server desynchronization
//! 3. All builds against one engine are strictly serialized
//! 4. Responses carry three ordered segments: prepend / delta / append
//!
//! ## Architecture
//!
//! ```text
//! getDelta(seq) → DeltaEngine → GraphDiffService (diff + snapshot)
//!                      ↓
//!           IdAllocator (prime ids, diff order)
//!                      ↓
//!      DeltaEntryBuilder fan-out (wrap + minify, parallel)
//!                      ↓
//!      SegmentAssembler (prepend/append, reset only)
//! ```
//!
//! Graph construction, per-file transformation and module resolution
//! are external collaborators, consumed through the [`host`] traits.
//!
//! ## Determinism Guarantees
//!
//! - Same diff enumeration order → same id assignment, every run
//! - Segment insertion order is fixed: prelude always sorts first
//! - Snapshot enumeration is canonical (ordered by path)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod entry;
pub mod error;
pub mod host;
pub mod ids;
pub mod query;
pub mod segments;
pub mod types;

// Re-exports
pub use engine::DeltaEngine;
pub use entry::DeltaEntryBuilder;
pub use error::DeltaError;
pub use host::{GraphDiffService, ModuleResolver, ModuleTransformer};
pub use host::{InMemoryGraphService, InMemoryResolver, InMemoryTransformer};
pub use ids::{IdAllocator, IdScope, DEFAULT_ID_BASE};
pub use segments::{BundleOptions, PRELUDE_PATH, SOURCE_MAP_COMMENT_PATH};
pub use types::{
    DeltaEntries, DeltaEntry, DeltaTransformResponse, DependencyEdge, EntryType, GraphDelta,
    GraphNode, GraphSnapshot, MapSegment, ModuleId, ModuleOutput, ModulePath, SequenceId,
    TransformOptions,
};

/// Schema version for the delta wire format.
/// Increment on breaking changes to any response type.
pub const DELTA_SCHEMA_VERSION: &str = "1.0.0";
