//! Delta responses: the wire-visible unit of output.

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use indexmap::IndexMap;
use uuid::Uuid;

use super::module::{EntryType, MapSegment, ModuleId, ModulePath};

/// Opaque session token exchanged on every build.
///
/// Minted from 122 bits of randomness (UUID v4) so that two distinct
/// builds never collide in practice. Not a content hash: it only
/// serves the reset-detection handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(Uuid);

impl SequenceId {
    /// Mint a fresh random sequence id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sequence id from its string form.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One emission-ready artifact. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Final code, post wrap/minify.
    pub code: String,
    /// Assigned module id.
    pub id: ModuleId,
    /// Source-map segments for `code`.
    pub map: Vec<MapSegment>,
    /// Display name.
    pub name: String,
    /// Original path.
    pub path: ModulePath,
    /// Original source text.
    pub source: String,
    /// Variant tag.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
}

/// Ordered mapping from module id to entry-or-tombstone.
///
/// Insertion order is part of the wire contract: the prepend segment
/// relies on the prelude being first, and the client applies entries
/// in the order received. A `None` value is a tombstone signalling
/// deletion of a previously known id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaEntries {
    entries: IndexMap<ModuleId, Option<DeltaEntry>>,
}

impl DeltaEntries {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, preserving insertion order.
    pub fn insert(&mut self, id: ModuleId, entry: DeltaEntry) {
        self.entries.insert(id, Some(entry));
    }

    /// Insert a tombstone for a deleted id.
    pub fn insert_tombstone(&mut self, id: ModuleId) {
        self.entries.insert(id, None);
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &ModuleId) -> Option<&Option<DeltaEntry>> {
        self.entries.get(id)
    }

    /// First id in insertion order, if any.
    pub fn first_id(&self) -> Option<ModuleId> {
        self.entries.keys().next().copied()
    }

    /// Iterate pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &Option<DeltaEntry>)> {
        self.entries.iter()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.entries.keys()
    }

    /// Number of pairs (entries plus tombstones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ModuleId, Option<DeltaEntry>)> for DeltaEntries {
    fn from_iter<I: IntoIterator<Item = (ModuleId, Option<DeltaEntry>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// Wire shape: an ordered sequence of (id, entry-or-null) pairs. A plain
// JSON object would lose non-string keys and, with some decoders, order.
impl Serialize for DeltaEntries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for pair in &self.entries {
            seq.serialize_element(&pair)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for DeltaEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = DeltaEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence of (module id, entry-or-null) pairs")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut entries = IndexMap::new();
                while let Some((id, entry)) = seq.next_element::<(ModuleId, Option<DeltaEntry>)>()?
                {
                    entries.insert(id, entry);
                }
                Ok(DeltaEntries { entries })
            }
        }

        deserializer.deserialize_seq(PairsVisitor)
    }
}

/// The unit of output of one delta build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaTransformResponse {
    /// Freshly minted sequence id for this build.
    pub id: SequenceId,
    /// Prepend segment; non-empty only when `reset` is true.
    pub pre: DeltaEntries,
    /// Append segment; non-empty only when `reset` is true.
    pub post: DeltaEntries,
    /// Added/modified entries and tombstones.
    pub delta: DeltaEntries,
    /// Whether the client must discard prior state before applying.
    pub reset: bool,
}
