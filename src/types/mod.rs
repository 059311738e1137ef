//! Core types for the delta bundler.

pub mod delta;
pub mod edge;
pub mod module;

pub use delta::{DeltaEntries, DeltaEntry, DeltaTransformResponse, SequenceId};
pub use edge::{DependencyEdge, GraphDelta, GraphNode, GraphSnapshot};
pub use module::{EntryType, MapSegment, ModuleId, ModuleOutput, ModulePath, TransformOptions};
