//! Typed record store: transactional CRUD plus planner-driven fetch.
//!
//! Every mutation runs in one KV transaction: it reads the prior record state,
//! writes the envelope (and any blob chunks), and applies the index-entry delta,
//! so index coherence holds at transaction granularity. Transient conflicts
//! retry with exponential backoff; logical errors surface immediately.

pub(crate) mod envelope;

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::ContainerInner;
use crate::error::StoreError;
use crate::index;
use crate::index::scalar;
use crate::item::{check_read, check_write, AuthContext, FieldMap, Item, ItemId};
use crate::keyspace::KeySpace;
use crate::kv::{KvTransaction, RangeOptions, ReadMode};
use crate::plan::{self, Plan, PlanNode};
use crate::query::{FieldPredicate, Query, SortDirection};
use crate::retry::with_retry;
use crate::schema::EntityDescriptor;
use crate::value::FieldValue;

/// What actually sits behind a record envelope: the serialized item plus its
/// write-time materialized field map. The map lets index rebuilds and residual
/// filters run without knowing the item type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub payload: Vec<u8>,
    pub fields: FieldMap,
}

impl StoredRecord {
    pub(crate) fn decode_item<T: Item>(&self) -> Result<T, StoreError> {
        bincode::deserialize(&self.payload).map_err(StoreError::from)
    }
}

/// Read one record (envelope + chunks) within a transaction.
pub(crate) async fn read_record(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    record_key: &[u8],
    mode: ReadMode,
) -> Result<Option<StoredRecord>, StoreError> {
    match envelope::read_blob(txn, ks, record_key, mode).await? {
        Some(blob) => Ok(Some(bincode::deserialize(&blob)?)),
        None => Ok(None),
    }
}

enum Mutation<'a> {
    Insert { record: &'a StoredRecord, blob: &'a [u8] },
    Save { record: &'a StoredRecord, blob: &'a [u8] },
    Delete,
}

/// Typed handle to one entity's records. Cheap to clone; shares the container.
pub struct ItemStore<T: Item> {
    pub(crate) inner: Arc<ContainerInner>,
    pub(crate) entity: EntityDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Item> Clone for ItemStore<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone(), entity: self.entity.clone(), _marker: PhantomData } }
}

impl<T: Item> ItemStore<T> {
    pub(crate) fn new(inner: Arc<ContainerInner>, entity: EntityDescriptor) -> Self {
        Self { inner, entity, _marker: PhantomData }
    }

    pub fn entity(&self) -> &EntityDescriptor { &self.entity }

    pub(crate) fn record_key(&self, id: &ItemId) -> Vec<u8> {
        self.inner.keyspace.record_key(&self.entity.type_name, &id.to_values())
    }

    fn encode(item: &T) -> Result<(StoredRecord, Vec<u8>), StoreError> {
        let record = StoredRecord { payload: bincode::serialize(item)?, fields: item.field_map() };
        let blob = bincode::serialize(&record)?;
        Ok((record, blob))
    }

    /// Create a record; fails with `DuplicateKey` when the primary key exists.
    pub async fn insert(&self, auth: &AuthContext, item: &T) -> Result<(), StoreError> {
        check_write::<T>(auth)?;
        let id = item.id();
        let (record, blob) = Self::encode(item)?;
        debug!(type_name = %self.entity.type_name, id = %id, "insert");
        with_retry!(&self.inner.retry, self.mutate(&id, Mutation::Insert { record: &record, blob: &blob }).await)
    }

    /// Upsert: reads the prior state to compute the index delta.
    pub async fn save(&self, auth: &AuthContext, item: &T) -> Result<(), StoreError> {
        check_write::<T>(auth)?;
        let id = item.id();
        let (record, blob) = Self::encode(item)?;
        debug!(type_name = %self.entity.type_name, id = %id, "save");
        with_retry!(&self.inner.retry, self.mutate(&id, Mutation::Save { record: &record, blob: &blob }).await)
    }

    /// Idempotent delete: clears the envelope, every blob chunk, and every index
    /// entry for the record.
    pub async fn delete(&self, auth: &AuthContext, id: &ItemId) -> Result<(), StoreError> {
        check_write::<T>(auth)?;
        debug!(type_name = %self.entity.type_name, id = %id, "delete");
        with_retry!(&self.inner.retry, self.mutate(id, Mutation::Delete).await)
    }

    async fn mutate(&self, id: &ItemId, mutation: Mutation<'_>) -> Result<(), StoreError> {
        let ks = &self.inner.keyspace;
        let mut txn = self.inner.engine.begin().await?;
        let key = self.record_key(id);

        let old = read_record(txn.as_mut(), ks, &key, ReadMode::Serializable).await?;
        match &mutation {
            Mutation::Insert { .. } if old.is_some() => return Err(StoreError::DuplicateKey(id.clone())),
            Mutation::Delete if old.is_none() => return Ok(()),
            _ => {}
        }
        let old_fields = old.as_ref().map(|r| &r.fields);

        match mutation {
            Mutation::Insert { record, blob } | Mutation::Save { record, blob } => {
                envelope::write_blob(txn.as_mut(), ks, &key, blob);
                index::apply_maintenance(txn.as_mut(), ks, &self.entity, id, old_fields, Some(&record.fields)).await?;
            }
            Mutation::Delete => {
                envelope::clear_blob(txn.as_mut(), ks, &key);
                index::apply_maintenance(txn.as_mut(), ks, &self.entity, id, old_fields, None).await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    /// Direct read; reassembles chunked values.
    pub async fn fetch_by_id(&self, auth: &AuthContext, id: &ItemId) -> Result<T, StoreError> {
        let mut txn = self.inner.engine.begin().await?;
        let record = read_record(txn.as_mut(), &self.inner.keyspace, &self.record_key(id), ReadMode::Snapshot)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(record.decode_item::<T>()?.mask(auth))
    }

    /// Planner-driven fetch: choose the best index, scan, point-fetch records,
    /// post-filter residual predicates.
    pub async fn fetch(&self, auth: &AuthContext, query: &Query) -> Result<Vec<T>, StoreError> {
        let plan = self.plan(query);
        debug!(type_name = %self.entity.type_name, cost = plan.cost, "fetch plan: {:?}", plan.node);
        let mut txn = self.inner.engine.begin().await?;
        let mut rows = self.execute_node(txn.as_mut(), &plan.node).await?;

        if let Some((field, direction)) = &query.order_by {
            sort_by_field(&mut rows, |record| &record.fields, field, *direction);
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        rows.into_iter().map(|(_, record)| Ok(record.decode_item::<T>()?.mask(auth))).collect()
    }

    /// Fetch only projected fields. When the plan is an index-only scan and any
    /// requested ordering is covered by the index key, the values come straight
    /// off the entry keys; otherwise records are fetched so sorting can see
    /// fields outside the key.
    pub async fn fetch_projected(&self, auth: &AuthContext, query: &Query) -> Result<Vec<FieldMap>, StoreError> {
        let projection = query
            .projection
            .as_ref()
            .ok_or_else(|| StoreError::InvalidPlan("fetch_projected requires a projection".into()))?
            .clone();
        let requested: Vec<&str> = projection.iter().map(String::as_str).collect();
        check_read::<T>(auth, &requested)?;

        let plan = self.plan(query);
        let mut txn = self.inner.engine.begin().await?;

        // Index-only execution is sound only when sorting (if any) can run over
        // the key fields alone.
        let index_only = match &plan.node {
            PlanNode::IndexOnlyScan { index, satisfied, residual } => {
                let index = self.entity.index(index)?.clone();
                let order_covered = query.order_by.as_ref().map(|(field, _)| index.fields.contains(field)).unwrap_or(true);
                order_covered.then_some((index, satisfied, residual))
            }
            _ => None,
        };

        let mut rows: Vec<(ItemId, FieldMap)> = match index_only {
            Some((index, satisfied, residual)) => {
                let entries = scalar::scan_prefix(txn.as_mut(), &self.inner.keyspace, &index, satisfied).await?;
                let mut out = Vec::with_capacity(entries.len());
                for (values, id) in entries {
                    let fields: FieldMap = index.fields.iter().cloned().zip(values).collect();
                    if residual_matches(residual, &fields)? {
                        out.push((id, fields));
                    }
                }
                out
            }
            None => self
                .execute_node(txn.as_mut(), &plan.node)
                .await?
                .into_iter()
                .map(|(id, record)| (id, record.fields))
                .collect(),
        };

        if let Some((field, direction)) = &query.order_by {
            sort_by_field(&mut rows, |fields| fields, field, *direction);
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(|(_, fields)| project(&fields, &projection)).collect())
    }

    /// The plan `fetch` would execute, without running it.
    pub fn plan(&self, query: &Query) -> Plan { plan::plan(query, &self.entity, &self.inner.hints, &self.inner.cost) }

    fn execute_node<'a>(
        &'a self,
        txn: &'a mut dyn KvTransaction,
        node: &'a PlanNode,
    ) -> BoxFuture<'a, Result<Vec<(ItemId, StoredRecord)>, StoreError>> {
        async move {
            let ks = &self.inner.keyspace;
            match node {
                PlanNode::TableScan { residual } => {
                    let subspace = ks.records(&self.entity.type_name);
                    let (begin, end) = subspace.range();
                    let pairs = txn.get_range(&begin, &end, RangeOptions::snapshot()).await?;
                    let mut out = Vec::new();
                    for (key, value) in pairs {
                        // Chunk keys live under `B`, so everything here is an envelope.
                        let record: StoredRecord = match envelope::Envelope::decode(&value)? {
                            envelope::Envelope::Inline(payload) => bincode::deserialize(&payload)?,
                            envelope::Envelope::Chunked { .. } => read_record(txn, ks, &key, ReadMode::Snapshot)
                                .await?
                                .ok_or(StoreError::CorruptEnvelope("placeholder without chunks"))?,
                        };
                        if residual_matches(residual, &record.fields)? {
                            out.push((ItemId::from_values(&subspace.unpack(&key)?)?, record));
                        }
                    }
                    Ok(out)
                }
                PlanNode::IndexScan { index, satisfied, residual, .. }
                | PlanNode::IndexOnlyScan { index, satisfied, residual } => {
                    let index = self.entity.index(index)?.clone();
                    let ids = scalar::scan_prefix_ids(txn, ks, &index, satisfied).await?;
                    self.fetch_ids(txn, ids, residual).await
                }
                PlanNode::IndexSeek { index, key, residual } => {
                    let index = self.entity.index(index)?.clone();
                    let entries = scalar::scan_equality(txn, ks, &index, key).await?;
                    let ids = entries.into_iter().map(|(_, id)| id).collect();
                    self.fetch_ids(txn, ids, residual).await
                }
                PlanNode::Union { left, right } => {
                    let mut merged: BTreeMap<ItemId, StoredRecord> =
                        self.execute_node(txn, left).await?.into_iter().collect();
                    for (id, record) in self.execute_node(txn, right).await? {
                        merged.entry(id).or_insert(record);
                    }
                    Ok(merged.into_iter().collect())
                }
                PlanNode::Intersection { left, right, residual } => {
                    let left_rows: BTreeMap<ItemId, StoredRecord> =
                        self.execute_node(txn, left).await?.into_iter().collect();
                    let mut out = Vec::new();
                    for (id, record) in self.execute_node(txn, right).await? {
                        if left_rows.contains_key(&id) && residual_matches(residual, &record.fields)? {
                            out.push((id, record));
                        }
                    }
                    Ok(out)
                }
            }
        }
        .boxed()
    }

    async fn fetch_ids(
        &self,
        txn: &mut dyn KvTransaction,
        ids: Vec<ItemId>,
        residual: &[FieldPredicate],
    ) -> Result<Vec<(ItemId, StoredRecord)>, StoreError> {
        let ks = &self.inner.keyspace;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = read_record(txn, ks, &self.record_key(&id), ReadMode::Snapshot).await? else {
                // Entry without a record cannot happen inside one transaction's
                // read version; tolerate it rather than fail the whole scan.
                tracing::warn!(id = %id, "index entry without record");
                continue;
            };
            if residual_matches(residual, &record.fields)? {
                out.push((id, record));
            }
        }
        Ok(out)
    }
}

fn residual_matches(residual: &[FieldPredicate], fields: &FieldMap) -> Result<bool, StoreError> {
    for pred in residual {
        if !pred.matches(fields)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn project(fields: &FieldMap, projection: &[String]) -> FieldMap {
    projection
        .iter()
        .map(|name| (name.clone(), fields.get(name).cloned().unwrap_or(FieldValue::Null)))
        .collect()
}

fn sort_by_field<R>(rows: &mut [(ItemId, R)], fields_of: impl Fn(&R) -> &FieldMap, field: &str, direction: SortDirection) {
    rows.sort_by(|(a_id, a), (b_id, b)| {
        let av = fields_of(a).get(field);
        let bv = fields_of(b).get(field);
        let ord = match (av, bv) {
            (Some(a), Some(b)) => a.compare(b).unwrap_or(std::cmp::Ordering::Equal),
            // Missing values sort last regardless of direction.
            (Some(_), None) => return std::cmp::Ordering::Less,
            (None, Some(_)) => return std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
        .then_with(|| a_id.cmp(b_id))
    });
}
