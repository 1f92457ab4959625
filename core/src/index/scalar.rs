//! Scalar index evaluation: equality, IN, and range scans over the ordered
//! entry keys, plus the filter stage the fusion engine composes.
//!
//! All scans run in snapshot mode so long index reads do not create read-conflict
//! ranges against concurrent writers.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::fusion::{CandidateSet, ScoredId, Stage};
use crate::index::IndexQueryContext;
use crate::item::{Item, ItemId};
use crate::keyspace::{prefix_successor, KeySpace};
use crate::kv::{KvTransaction, RangeOptions};
use crate::query::{Bound, Comparison, FieldPredicate};
use crate::schema::{IndexDescriptor, IndexKind};
use crate::value::FieldValue;

/// One decoded index entry: the keyed field values and the trailing id.
pub type IndexEntry = (Vec<FieldValue>, ItemId);

fn require_scalar(index: &IndexDescriptor) -> Result<(), StoreError> {
    match index.kind {
        IndexKind::Scalar => Ok(()),
        _ => Err(StoreError::SchemaMismatch(format!("index '{}' is not scalar", index.name))),
    }
}

fn decode_entry(ks: &KeySpace, index: &IndexDescriptor, key: &[u8]) -> Result<IndexEntry, StoreError> {
    let mut elements = ks.index(&index.name).unpack(key)?;
    if elements.len() <= index.fields.len() {
        return Err(StoreError::SchemaMismatch(format!("index '{}' entry key too short", index.name)));
    }
    let id_values = elements.split_off(index.fields.len());
    Ok((elements, ItemId::from_values(&id_values)?))
}

async fn collect_range(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    begin: &[u8],
    end: &[u8],
) -> Result<Vec<IndexEntry>, StoreError> {
    let pairs = txn.get_range(begin, end, RangeOptions::snapshot()).await?;
    pairs.iter().map(|(key, _)| decode_entry(ks, index, key)).collect()
}

/// Equality on a full or partial left prefix: scan the packed-prefix subspace.
pub async fn scan_equality(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    values: &[FieldValue],
) -> Result<Vec<IndexEntry>, StoreError> {
    require_scalar(index)?;
    let (begin, end) = ks.index(&index.name).subspace(values).range();
    collect_range(txn, ks, index, &begin, &end).await
}

/// IN on the field after the equality prefix: union of equality scans,
/// deduplicated by id.
pub async fn scan_in(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    prefix: &[FieldValue],
    alternatives: &[FieldValue],
) -> Result<Vec<IndexEntry>, StoreError> {
    let mut seen = CandidateSet::new();
    let mut out = Vec::new();
    for alt in alternatives {
        let mut values = prefix.to_vec();
        values.push(alt.clone());
        for entry in scan_equality(txn, ks, index, &values).await? {
            if seen.insert(entry.1.clone()) {
                out.push(entry);
            }
        }
    }
    Ok(out)
}

/// Range on the field after the equality prefix, `[begin, end)` built with the
/// key-increment rule: an exclusive lower bound and an inclusive upper bound both
/// step past every key prefixed by the packed bound value.
pub async fn scan_range(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    prefix: &[FieldValue],
    low: Option<&Bound>,
    high: Option<&Bound>,
) -> Result<Vec<IndexEntry>, StoreError> {
    require_scalar(index)?;
    let subspace = ks.index(&index.name).subspace(prefix);
    let (sub_begin, sub_end) = subspace.range();

    let begin = match low {
        Some(b) => {
            let packed = subspace.pack(std::slice::from_ref(&b.value));
            if b.inclusive {
                packed
            } else {
                match prefix_successor(&packed) {
                    Some(next) => next,
                    // No key can follow an all-0xFF bound.
                    None => return Ok(Vec::new()),
                }
            }
        }
        None => sub_begin,
    };
    let end = match high {
        Some(b) => {
            let packed = subspace.pack(std::slice::from_ref(&b.value));
            if b.inclusive { prefix_successor(&packed).unwrap_or_default() } else { packed }
        }
        None => sub_end,
    };

    collect_range(txn, ks, index, &begin, &end).await
}

/// Evaluate a satisfied left-prefix (equalities, then at most one range/IN)
/// against one index. This is what the planner's IndexScan and IndexSeek nodes
/// execute.
pub async fn scan_prefix(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    satisfied: &[FieldPredicate],
) -> Result<Vec<IndexEntry>, StoreError> {
    let mut prefix: Vec<FieldValue> = Vec::new();
    for (i, pred) in satisfied.iter().enumerate() {
        match &pred.cmp {
            Comparison::Eq(v) => prefix.push(v.clone()),
            Comparison::In(alternatives) => {
                debug_assert_eq!(i, satisfied.len() - 1, "IN must terminate the prefix");
                return scan_in(txn, ks, index, &prefix, alternatives).await;
            }
            Comparison::Range { low, high } => {
                debug_assert_eq!(i, satisfied.len() - 1, "range must terminate the prefix");
                return scan_range(txn, ks, index, &prefix, low.as_ref(), high.as_ref()).await;
            }
        }
    }
    scan_equality(txn, ks, index, &prefix).await
}

pub async fn scan_prefix_ids(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    satisfied: &[FieldPredicate],
) -> Result<Vec<ItemId>, StoreError> {
    Ok(scan_prefix(txn, ks, index, satisfied).await?.into_iter().map(|(_, id)| id).collect())
}

/// Scalar filter as a fusion stage: runs the scans, intersects with any incoming
/// candidate set, and emits `score = 1.0` for every survivor.
pub struct FilterStage {
    index: String,
    satisfied: Vec<FieldPredicate>,
}

impl FilterStage {
    pub fn new(index: impl Into<String>, satisfied: Vec<FieldPredicate>) -> Self {
        Self { index: index.into(), satisfied }
    }
}

#[async_trait]
impl<T: Item> Stage<T> for FilterStage {
    async fn execute(
        &self,
        ctx: &mut IndexQueryContext<'_, T>,
        candidates: Option<&CandidateSet>,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let index = ctx.entity.index(&self.index)?.clone();
        let ids = scan_prefix_ids(ctx.txn, ctx.keyspace, &index, &self.satisfied).await?;
        Ok(ids
            .into_iter()
            .filter(|id| candidates.map(|c| c.contains(id)).unwrap_or(true))
            .map(|id| ScoredId::new(id, 1.0))
            .collect())
    }
}
