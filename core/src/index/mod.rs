//! Index lifecycle and entry maintenance.
//!
//! Scalar entries live at `I/<indexName>/<keyFields…>/<id-tuple>` with empty
//! values; vector entries at `I/<indexName>/<id-tuple>` with the PQ code as
//! value. Maintenance runs inside the same transaction as the record mutation:
//! it diffs the old and new keyed field values and emits exactly the clears and
//! sets needed to keep every entry-bearing index coherent.

pub mod rank;
pub mod scalar;
pub mod vector;

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::item::{FieldMap, Item, ItemId};
use crate::keyspace::KeySpace;
use crate::kv::{KvTransaction, ReadMode};
use crate::schema::{EntityDescriptor, IndexDescriptor, IndexKind};
use crate::value::{tuple, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Building,
    Ready,
    Failed,
}

impl IndexState {
    pub fn label(&self) -> &'static str {
        match self {
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Failed => "failed",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "building" => Some(IndexState::Building),
            "ready" => Some(IndexState::Ready),
            "failed" => Some(IndexState::Failed),
            _ => None,
        }
    }
}

/// Persisted under `T/<indexName>` as the tuple `(state, builtThroughVersion)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStatus {
    pub state: IndexState,
    pub built_through_version: u64,
}

impl IndexStatus {
    pub fn encode(&self) -> Vec<u8> {
        tuple::pack(&[FieldValue::String(self.state.label().into()), FieldValue::Int(self.built_through_version as i64)])
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let values = tuple::unpack(bytes)?;
        match values.as_slice() {
            [FieldValue::String(label), FieldValue::Int(version)] => {
                let state = IndexState::from_label(label)
                    .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown index state '{}'", label)))?;
                Ok(Self { state, built_through_version: *version as u64 })
            }
            _ => Err(StoreError::SchemaMismatch("malformed index state tuple".into())),
        }
    }
}

pub async fn load_status(txn: &mut dyn KvTransaction, ks: &KeySpace, index_name: &str) -> Result<Option<IndexStatus>, StoreError> {
    match txn.get(&ks.index_state_key(index_name), ReadMode::Snapshot).await? {
        Some(bytes) => Ok(Some(IndexStatus::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn save_status(txn: &mut dyn KvTransaction, ks: &KeySpace, index_name: &str, status: IndexStatus) {
    txn.set(&ks.index_state_key(index_name), &status.encode());
}

/// The scalar entry key for one record, or `None` when any keyed field is null
/// or missing (such records carry no entry).
pub fn scalar_entry_key(ks: &KeySpace, index: &IndexDescriptor, fields: &FieldMap, id: &ItemId) -> Option<Vec<u8>> {
    let mut values = Vec::with_capacity(index.fields.len() + id.elements().len());
    for field in &index.fields {
        match fields.get(field) {
            Some(v) if !v.is_null() => values.push(v.clone()),
            _ => return None,
        }
    }
    values.extend(id.to_values());
    Some(ks.index(&index.name).pack(&values))
}

/// Apply the entry delta for one record mutation. `old`/`new` are the field maps
/// before and after; `None` means the record did not / will not exist.
pub(crate) async fn apply_maintenance(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    entity: &EntityDescriptor,
    id: &ItemId,
    old: Option<&FieldMap>,
    new: Option<&FieldMap>,
) -> Result<(), StoreError> {
    for index in entity.indexes.iter().filter(|i| i.has_entries()) {
        match &index.kind {
            IndexKind::Scalar => {
                let old_key = old.and_then(|f| scalar_entry_key(ks, index, f, id));
                let new_key = new.and_then(|f| scalar_entry_key(ks, index, f, id));
                if old_key != new_key {
                    if let Some(k) = old_key {
                        txn.clear(&k);
                    }
                    if let Some(k) = new_key {
                        txn.set(&k, &[]);
                    }
                }
            }
            IndexKind::VectorPq { dim, .. } => {
                vector::maintain_entry(txn, ks, index, *dim, id, old, new).await?;
            }
            IndexKind::Rank | IndexKind::Text => {}
        }
    }
    Ok(())
}

/// Per-call query scope for fusion stages: one transaction, one key-space, one
/// entity. Must not be stored across transactions.
pub struct IndexQueryContext<'t, T: Item> {
    pub(crate) txn: &'t mut dyn KvTransaction,
    pub(crate) keyspace: &'t KeySpace,
    pub(crate) entity: &'t EntityDescriptor,
    _marker: PhantomData<T>,
}

impl<'t, T: Item> IndexQueryContext<'t, T> {
    pub fn new(txn: &'t mut dyn KvTransaction, keyspace: &'t KeySpace, entity: &'t EntityDescriptor) -> Self {
        Self { txn, keyspace, entity, _marker: PhantomData }
    }

    pub fn entity(&self) -> &EntityDescriptor { self.entity }

    pub fn index(&self, name: &str) -> Result<&IndexDescriptor, StoreError> { self.entity.index(name) }

    /// Point-fetch one record within the stage's transaction.
    pub async fn get_item(&mut self, id: &ItemId) -> Result<Option<T>, StoreError> {
        let key = self.keyspace.record_key(&self.entity.type_name, &id.to_values());
        match crate::store::read_record(self.txn, self.keyspace, &key, ReadMode::Snapshot).await? {
            Some(record) => Ok(Some(record.decode_item()?)),
            None => Ok(None),
        }
    }
}
