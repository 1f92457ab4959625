//! PQ vector index: codebooks persist as one blob under the index's metadata
//! subspace, per-record codes as entry values keyed by id tuple. Search is
//! brute-force ADC over a snapshot scan of the entry subspace.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use async_trait::async_trait;
use quarry_pq::ProductQuantizer;
use tracing::debug;

use crate::error::StoreError;
use crate::fusion::{CandidateSet, ScoredId, Stage};
use crate::index::IndexQueryContext;
use crate::item::{FieldMap, Item, ItemId};
use crate::keyspace::KeySpace;
use crate::kv::{KvTransaction, RangeOptions, ReadMode};
use crate::schema::{IndexDescriptor, IndexKind};
use crate::store::envelope;

const CODEBOOKS_SLOT: &str = "codebooks";

pub(crate) fn codebooks_key(ks: &KeySpace, index_name: &str) -> Vec<u8> {
    ks.index_meta(index_name).pack(&[crate::value::FieldValue::String(CODEBOOKS_SLOT.into())])
}

/// Load the trained codec for an index, if training has happened yet.
pub async fn load_codec(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index_name: &str,
) -> Result<Option<ProductQuantizer>, StoreError> {
    let key = codebooks_key(ks, index_name);
    match envelope::read_blob(txn, ks, &key, ReadMode::Snapshot).await? {
        Some(blob) => Ok(Some(ProductQuantizer::from_bytes(&blob)?)),
        None => Ok(None),
    }
}

/// Persist trained codebooks. Oversized codebooks chunk exactly like records.
pub fn store_codec(txn: &mut dyn KvTransaction, ks: &KeySpace, index_name: &str, codec: &ProductQuantizer) -> Result<(), StoreError> {
    let blob = codec.to_bytes()?;
    envelope::write_blob(txn, ks, &codebooks_key(ks, index_name), &blob);
    Ok(())
}

/// Entry maintenance for one record mutation. Untrained indexes are skipped;
/// they stay `building` until codebooks exist and a rebuild fills them.
pub(crate) async fn maintain_entry(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    dim: usize,
    id: &ItemId,
    old: Option<&FieldMap>,
    new: Option<&FieldMap>,
) -> Result<(), StoreError> {
    let field = &index.fields[0];
    let entry_key = ks.index(&index.name).pack(&id.to_values());

    let new_vector = new.and_then(|f| f.get(field)).and_then(|v| v.as_vector());
    match new_vector {
        Some(vector) => {
            let Some(codec) = load_codec(txn, ks, &index.name).await? else {
                debug!(index = %index.name, "vector index untrained; skipping entry");
                return Ok(());
            };
            if vector.len() != dim {
                return Err(StoreError::Pq(quarry_pq::PqError::DimensionMismatch { expected: dim, got: vector.len() }));
            }
            txn.set(&entry_key, &codec.encode(&vector)?);
        }
        None => {
            let had_vector = old.and_then(|f| f.get(field)).and_then(|v| v.as_vector()).is_some();
            if had_vector {
                txn.clear(&entry_key);
            }
        }
    }
    Ok(())
}

// Max-heap entry so the heap root is the worst of the current top-k.
struct HeapEntry {
    distance: f32,
    id: ItemId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then_with(|| self.id.cmp(&other.id))
    }
}

/// Brute-force ADC k-NN over the index subspace. Returns `(id, distance)` pairs,
/// closest first.
pub async fn search(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    index: &IndexDescriptor,
    query: &[f32],
    k: usize,
    candidates: Option<&CandidateSet>,
) -> Result<Vec<(ItemId, f32)>, StoreError> {
    let IndexKind::VectorPq { .. } = index.kind else {
        return Err(StoreError::SchemaMismatch(format!("index '{}' is not a vector index", index.name)));
    };
    let Some(codec) = load_codec(txn, ks, &index.name).await? else {
        return Err(StoreError::Pq(quarry_pq::PqError::NotTrained));
    };
    let table = codec.distance_table(query)?;

    let subspace = ks.index(&index.name);
    let (begin, end) = subspace.range();
    let pairs = txn.get_range(&begin, &end, RangeOptions::snapshot()).await?;

    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k + 1);
    for (key, code) in &pairs {
        let id = ItemId::from_values(&subspace.unpack(key)?)?;
        if let Some(candidates) = candidates {
            if !candidates.contains(&id) {
                continue;
            }
        }
        let distance = table.distance(code)?;
        heap.push(HeapEntry { distance, id });
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut out: Vec<(ItemId, f32)> = heap.into_iter().map(|e| (e.id, e.distance)).collect();
    out.sort_by(|(a_id, a), (b_id, b)| a.total_cmp(b).then_with(|| a_id.cmp(b_id)));
    Ok(out)
}

/// k-NN as a fusion stage. Scores are squared ADC distances (smaller is closer);
/// the output is ordered closest-first, which is what the rank fusion consumes.
pub struct VectorStage {
    index: String,
    query: Vec<f32>,
    k: usize,
}

impl VectorStage {
    pub fn new(index: impl Into<String>, query: Vec<f32>, k: usize) -> Self { Self { index: index.into(), query, k } }
}

#[async_trait]
impl<T: Item> Stage<T> for VectorStage {
    async fn execute(
        &self,
        ctx: &mut IndexQueryContext<'_, T>,
        candidates: Option<&CandidateSet>,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let index = ctx.entity.index(&self.index)?.clone();
        let hits = search(ctx.txn, ctx.keyspace, &index, &self.query, self.k, candidates).await?;
        Ok(hits.into_iter().map(|(id, distance)| ScoredId::new(id, distance as f64)).collect())
    }
}
