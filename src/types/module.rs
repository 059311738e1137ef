//! Module identity and output types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, unique identifier for a source file or synthetic module.
///
/// Paths are the primary key of the dependency graph before module ids
/// are assigned. Implements `Ord` for deterministic collections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(String);

impl ModulePath {
    /// Create a new module path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Get the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component without extension, used as a fallback display name.
    pub fn file_stem(&self) -> &str {
        let base = self.0.rsplit('/').next().unwrap_or(&self.0);
        base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base)
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModulePath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModulePath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable integer identifier assigned to a module path.
///
/// Ids are 1:1 with paths within one allocator scope, monotonically
/// allocated and never reused. A path that is deleted and re-added
/// keeps its original id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u64);

impl ModuleId {
    /// Get the raw integer value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Variant tag of a delta entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Bundled asset (image, font, ...).
    Asset,
    /// Regular wrapped module.
    Module,
    /// Unwrapped script (prelude, polyfills, module system).
    Script,
    /// Emitted comment (source-map directive).
    Comment,
    /// Startup `require(...)` call.
    Require,
}

impl EntryType {
    /// Parse an entry type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asset" => Some(Self::Asset),
            "module" => Some(Self::Module),
            "script" => Some(Self::Script),
            "comment" => Some(Self::Comment),
            "require" => Some(Self::Require),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asset => write!(f, "asset"),
            Self::Module => write!(f, "module"),
            Self::Script => write!(f, "script"),
            Self::Comment => write!(f, "comment"),
            Self::Require => write!(f, "require"),
        }
    }
}

/// One source-map segment tuple, passed through untouched.
pub type MapSegment = Vec<i64>;

/// Raw build output of a graph node, as produced by the transform pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Transformed (but not yet wrapped) code.
    pub code: String,
    /// Source-map segments for `code`.
    pub map: Vec<MapSegment>,
    /// Original source text.
    pub source: String,
    /// Variant tag carried through to the emitted entry.
    pub entry_type: EntryType,
}

impl ModuleOutput {
    /// Create a module-variant output.
    pub fn module(code: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: Vec::new(),
            source: source.into(),
            entry_type: EntryType::Module,
        }
    }

    /// Create a script-variant output (polyfills, module system).
    pub fn script(code: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: Vec::new(),
            source: source.into(),
            entry_type: EntryType::Script,
        }
    }
}

/// Options controlling per-module transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Development build (affects prelude content).
    pub dev: bool,
    /// Run wrapped code through the minifier.
    pub minify: bool,
    /// Target platform, if any.
    pub platform: Option<String>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            dev: true,
            minify: false,
            platform: None,
        }
    }
}
