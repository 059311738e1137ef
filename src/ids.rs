//! Deterministic module id allocation.
//!
//! Ids are assigned on first request, in request order, and never
//! reused. Two runs that request ids for identical paths in identical
//! order assign identical ids, which is what makes incremental bundle
//! output diffable across rebuilds.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ModuleId, ModulePath};

/// First id handed out by [`IdAllocator::default`].
pub const DEFAULT_ID_BASE: u64 = 1000;

struct AllocatorInner {
    next: u64,
    ids: HashMap<ModulePath, ModuleId>,
}

/// Monotone path -> id table.
///
/// Assignment is purely a function of path identity: a path that is
/// deleted and later re-added keeps its original id. The table only
/// grows; there is no removal operation.
///
/// An allocator is shared across engine instances by cloning an
/// `Arc<IdAllocator>` (see [`IdScope::Shared`]); callers that need ids
/// reproducible independently of other bundling activity use an
/// isolated allocator instead.
pub struct IdAllocator {
    inner: Mutex<AllocatorInner>,
}

impl IdAllocator {
    /// Create an allocator starting at `base`.
    pub fn new(base: u64) -> Self {
        Self {
            inner: Mutex::new(AllocatorInner {
                next: base,
                ids: HashMap::new(),
            }),
        }
    }

    /// Id for a path, assigning the next unused integer on first request.
    pub fn id(&self, path: &ModulePath) -> ModuleId {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.ids.get(path) {
            return *id;
        }
        let id = ModuleId(inner.next);
        inner.next += 1;
        inner.ids.insert(path.clone(), id);
        id
    }

    /// Id for a path if one has already been assigned.
    ///
    /// Read-only probe: used for tombstones and append filtering so
    /// that dead paths never mint fresh ids.
    pub fn known_id(&self, path: &ModulePath) -> Option<ModuleId> {
        self.inner.lock().ids.get(path).copied()
    }

    /// Number of assigned ids.
    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    /// Whether no ids have been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().ids.is_empty()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_BASE)
    }
}

/// Allocator scope selected at engine construction.
///
/// Sharing is explicit: callers that want coupled ids across several
/// engine instances construct one allocator and inject it into each;
/// the crate never holds a process-global table.
pub enum IdScope {
    /// Use an explicitly shared allocator.
    Shared(Arc<IdAllocator>),
    /// Use a private allocator owned by this engine instance.
    Isolated,
}

impl IdScope {
    pub(crate) fn into_allocator(self) -> Arc<IdAllocator> {
        match self {
            Self::Shared(allocator) => allocator,
            Self::Isolated => Arc::new(IdAllocator::default()),
        }
    }
}
