//! Fusion pipeline: an ordered list of stages, each handed the candidate ids the
//! previous stage produced, merged into one ranking by reciprocal-rank fusion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;
use crate::index::IndexQueryContext;
use crate::item::{Item, ItemId};

pub type CandidateSet = BTreeSet<ItemId>;

/// A stage's scored output row. Stages return rows best-first; equal scores are
/// ranked as ties by the fusion policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: ItemId,
    pub score: f64,
}

impl ScoredId {
    pub fn new(id: ItemId, score: f64) -> Self { Self { id, score } }
}

/// A fused result with the record materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult<T> {
    pub item: T,
    pub score: f64,
}

/// One query operator. Stage 0 runs against the unrestricted universe
/// (`candidates == None`); later stages receive the previous stage's id set.
/// Stages that can only score an existing candidate set (rank, custom
/// predicates) report `requires_candidates` and are rejected at position 0.
#[async_trait]
pub trait Stage<T: Item>: Send + Sync {
    fn requires_candidates(&self) -> bool { false }

    async fn execute(
        &self,
        ctx: &mut IndexQueryContext<'_, T>,
        candidates: Option<&CandidateSet>,
    ) -> Result<Vec<ScoredId>, StoreError>;
}

/// In-process predicate over fetched candidates. Expensive; never a first stage.
pub struct PredicateStage<T> {
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> PredicateStage<T> {
    pub fn new(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self { Self { predicate: Arc::new(predicate) } }
}

#[async_trait]
impl<T: Item> Stage<T> for PredicateStage<T> {
    fn requires_candidates(&self) -> bool { true }

    async fn execute(
        &self,
        ctx: &mut IndexQueryContext<'_, T>,
        candidates: Option<&CandidateSet>,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let Some(candidates) = candidates else {
            return Err(StoreError::InvalidPlan("predicate stage requires a candidate set".into()));
        };
        let mut out = Vec::new();
        for id in candidates {
            if let Some(item) = ctx.get_item(id).await? {
                if (self.predicate)(&item) {
                    out.push(ScoredId::new(id.clone(), 1.0));
                }
            }
        }
        Ok(out)
    }
}

/// Reciprocal-rank fusion over sequential stages.
pub struct FusionEngine {
    rrf_k: f64,
}

impl Default for FusionEngine {
    fn default() -> Self { Self { rrf_k: 60.0 } }
}

impl FusionEngine {
    pub fn new() -> Self { Self::default() }

    pub fn with_rrf_k(rrf_k: f64) -> Self { Self { rrf_k } }

    /// Run the stages and return fused, materialized results.
    ///
    /// Any stage returning the empty set short-circuits to an empty result; the
    /// first stage error aborts the pipeline.
    pub async fn run<T: Item>(
        &self,
        ctx: &mut IndexQueryContext<'_, T>,
        stages: &[Box<dyn Stage<T>>],
    ) -> Result<Vec<ScoredResult<T>>, StoreError> {
        if stages.is_empty() {
            return Ok(Vec::new());
        }
        if stages[0].requires_candidates() {
            return Err(StoreError::InvalidPlan("first stage cannot require a candidate set".into()));
        }

        let mut contributions: BTreeMap<ItemId, f64> = BTreeMap::new();
        let mut candidates: Option<CandidateSet> = None;

        for stage in stages {
            let output = stage.execute(ctx, candidates.as_ref()).await?;
            if output.is_empty() {
                return Ok(Vec::new());
            }

            // Competition ranking: rows are best-first, equal scores share a rank.
            let mut rank = 0usize;
            let mut prev_score = f64::NAN;
            for (position, row) in output.iter().enumerate() {
                if row.score != prev_score {
                    rank = position + 1;
                    prev_score = row.score;
                }
                *contributions.entry(row.id.clone()).or_insert(0.0) += 1.0 / (self.rrf_k + rank as f64);
            }

            candidates = Some(output.into_iter().map(|r| r.id).collect());
        }

        // Only ids that survived every stage qualify for the final ranking.
        let survivors = candidates.unwrap_or_default();
        let mut ranked: Vec<(ItemId, f64)> =
            contributions.into_iter().filter(|(id, _)| survivors.contains(id)).collect();
        ranked.sort_by(|(a_id, a_score), (b_id, b_score)| {
            b_score.partial_cmp(a_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a_id.packed().cmp(&b_id.packed()))
        });

        let mut results = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            match ctx.get_item(&id).await? {
                Some(item) => results.push(ScoredResult { item, score }),
                // An id without a record means the entry outlived its record
                // within this read version; skip rather than fail the query.
                None => warn!(%id, "fused candidate has no record"),
            }
        }
        Ok(results)
    }
}
