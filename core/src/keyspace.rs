//! Key-space layout over the ordered store.
//!
//! Every region hangs off the container root under a single-character prefix so
//! scans stay short:
//!
//! | char | region |
//! |------|--------|
//! | `R`  | records: `R/<typeName>/<id-tuple>` |
//! | `I`  | index entries: `I/<indexName>/<keyFields…>/<id-tuple>` |
//! | `S`  | store metadata (codebooks, persisted statistics, `S/F` tombstones) |
//! | `T`  | index state: `T/<indexName>` → `(state, builtThroughVersion)` |
//! | `M`  | misc metadata / violations |
//! | `B`  | blob chunks: `B/<itemKeyBytes>/<chunkIndex>` |

use crate::value::tuple;
use crate::value::FieldValue;

pub const REGION_RECORDS: u8 = b'R';
pub const REGION_INDEXES: u8 = b'I';
pub const REGION_STORE_META: u8 = b'S';
pub const REGION_INDEX_STATE: u8 = b'T';
pub const REGION_MISC: u8 = b'M';
pub const REGION_BLOBS: u8 = b'B';

/// A byte-prefix view with tuple packing and nesting helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self { Self { prefix: prefix.into() } }

    pub fn bytes(&self) -> &[u8] { &self.prefix }

    /// Nest under a raw suffix.
    pub fn child(&self, suffix: &[u8]) -> Subspace {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(suffix);
        Subspace { prefix }
    }

    /// Nest under tuple-packed values.
    pub fn subspace(&self, values: &[FieldValue]) -> Subspace { self.child(&tuple::pack(values)) }

    /// Full key: prefix + tuple-packed values.
    pub fn pack(&self, values: &[FieldValue]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(&tuple::pack(values));
        key
    }

    /// Decode the tuple elements of a key under this subspace.
    pub fn unpack(&self, key: &[u8]) -> Result<Vec<FieldValue>, tuple::TupleError> {
        debug_assert!(key.starts_with(&self.prefix));
        tuple::unpack(&key[self.prefix.len()..])
    }

    pub fn contains(&self, key: &[u8]) -> bool { key.starts_with(&self.prefix) }

    /// `[begin, end)` covering exactly the keys under this prefix. An empty end
    /// means "unbounded" (see [`crate::kv`]).
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        (self.prefix.clone(), prefix_successor(&self.prefix).unwrap_or_default())
    }
}

/// First key strictly after every key prefixed by `key`: strip trailing 0xFF
/// bytes and increment the last remaining one. `None` for all-0xFF input, which
/// has no bounded successor.
pub fn prefix_successor(key: &[u8]) -> Option<Vec<u8>> {
    let end = key.iter().rposition(|&b| b != 0xFF)?;
    let mut out = key[..=end].to_vec();
    out[end] += 1;
    Some(out)
}

/// Immediate successor of a single key: append 0x00.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut out = key.to_vec();
    out.push(0x00);
    out
}

/// Region assignment for one container root.
#[derive(Debug, Clone)]
pub struct KeySpace {
    root: Subspace,
}

impl KeySpace {
    pub fn new(root_prefix: impl Into<Vec<u8>>) -> Self { Self { root: Subspace::new(root_prefix) } }

    pub fn root(&self) -> &Subspace { &self.root }

    fn region(&self, tag: u8) -> Subspace { self.root.child(&[tag]) }

    pub fn records(&self, type_name: &str) -> Subspace {
        self.region(REGION_RECORDS).subspace(&[FieldValue::String(type_name.into())])
    }

    pub fn record_key(&self, type_name: &str, id_values: &[FieldValue]) -> Vec<u8> {
        self.records(type_name).pack(id_values)
    }

    pub fn index(&self, index_name: &str) -> Subspace {
        self.region(REGION_INDEXES).subspace(&[FieldValue::String(index_name.into())])
    }

    pub fn index_state_key(&self, index_name: &str) -> Vec<u8> {
        self.region(REGION_INDEX_STATE).pack(&[FieldValue::String(index_name.into())])
    }

    pub fn store_meta(&self) -> Subspace { self.region(REGION_STORE_META) }

    /// Per-index metadata (e.g. `codebooks` for a vector index).
    pub fn index_meta(&self, index_name: &str) -> Subspace {
        self.store_meta().subspace(&[FieldValue::String(index_name.into())])
    }

    pub fn statistics_key(&self, type_name: &str) -> Vec<u8> {
        self.store_meta().pack(&[FieldValue::String("stats".into()), FieldValue::String(type_name.into())])
    }

    /// Tombstone marking an index whose subspace is being dropped.
    pub fn former_index_key(&self, index_name: &str) -> Vec<u8> {
        self.store_meta().child(&[b'F']).pack(&[FieldValue::String(index_name.into())])
    }

    pub fn misc(&self) -> Subspace { self.region(REGION_MISC) }

    /// Chunks of one oversized record: `B/<itemKeyBytes>/<chunkIndex>`.
    pub fn blobs(&self, record_key: &[u8]) -> Subspace {
        self.region(REGION_BLOBS).subspace(&[FieldValue::Bytes(record_key.to_vec())])
    }

    pub fn blob_chunk_key(&self, record_key: &[u8], chunk_index: u32) -> Vec<u8> {
        self.blobs(record_key).pack(&[FieldValue::Int(chunk_index as i64)])
    }
}
