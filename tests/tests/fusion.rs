//! Fusion engine: candidate threading, reciprocal-rank scoring, short-circuit,
//! and stage-position validation.

mod common;

use async_trait::async_trait;
use common::*;
use quarry::{
    CandidateSet, FilterStage, IndexQueryContext, PredicateStage, RankStage, ScoredId, Stage, StoreError,
};

/// Test stage with a canned output, independent of storage.
struct FixedStage {
    rows: Vec<(i64, f64)>,
}

#[async_trait]
impl Stage<Doc> for FixedStage {
    async fn execute(
        &self,
        _ctx: &mut IndexQueryContext<'_, Doc>,
        _candidates: Option<&CandidateSet>,
    ) -> Result<Vec<ScoredId>, StoreError> {
        Ok(self.rows.iter().map(|(id, score)| ScoredId::new(ItemId::int(*id), *score)).collect())
    }
}

async fn seeded_docs(container: &Container, ids: &[i64]) {
    let store = container.store::<Doc>().unwrap();
    let auth = auth();
    for id in ids {
        store
            .insert(&auth, &Doc { id: *id, topic: "t".into(), rating: *id as f64, embedding: vec![0.0; DOC_DIM] })
            .await
            .unwrap();
    }
}

/// RRF with k=60: stage A returns [a,b,c] as a filter (uniform scores, all rank
/// 1), stage B ranks [b,c,a] distinctly. Final order [b, c, a] with scores
/// 2/61, 1/61 + 1/62, 1/61 + 1/63.
#[tokio::test]
async fn reciprocal_rank_fusion_matches_hand_computation() -> anyhow::Result<()> {
    let (a, b, c) = (1i64, 2i64, 3i64);
    let container = container().await;
    seeded_docs(&container, &[a, b, c]).await;

    let stages: Vec<Box<dyn Stage<Doc>>> = vec![
        Box::new(FixedStage { rows: vec![(a, 1.0), (b, 1.0), (c, 1.0)] }),
        Box::new(FixedStage { rows: vec![(b, 0.9), (c, 0.5), (a, 0.1)] }),
    ];
    let results = container.fusion_query(&auth(), &stages).await?;

    let order: Vec<i64> = results.iter().map(|r| r.item.id).collect();
    assert_eq!(order, vec![b, c, a]);

    let expect = [2.0 / 61.0, 1.0 / 61.0 + 1.0 / 62.0, 1.0 / 61.0 + 1.0 / 63.0];
    for (result, expect) in results.iter().zip(expect) {
        assert!((result.score - expect).abs() < 1e-12, "score {} vs {}", result.score, expect);
    }
    Ok(())
}

#[tokio::test]
async fn later_stages_only_see_prior_candidates() -> anyhow::Result<()> {
    let container = container().await;
    seeded_docs(&container, &[1, 2, 3, 4]).await;

    struct EchoCandidates;
    #[async_trait]
    impl Stage<Doc> for EchoCandidates {
        fn requires_candidates(&self) -> bool { true }
        async fn execute(
            &self,
            _ctx: &mut IndexQueryContext<'_, Doc>,
            candidates: Option<&CandidateSet>,
        ) -> Result<Vec<ScoredId>, StoreError> {
            Ok(candidates.unwrap().iter().map(|id| ScoredId::new(id.clone(), 1.0)).collect())
        }
    }

    let stages: Vec<Box<dyn Stage<Doc>>> = vec![
        Box::new(FixedStage { rows: vec![(2, 1.0), (4, 1.0)] }),
        Box::new(EchoCandidates),
    ];
    let results = container.fusion_query(&auth(), &stages).await?;
    let mut ids: Vec<i64> = results.iter().map(|r| r.item.id).collect();
    ids.sort();
    assert_eq!(ids, vec![2, 4]);
    Ok(())
}

#[tokio::test]
async fn empty_stage_short_circuits() -> anyhow::Result<()> {
    let container = container().await;
    seeded_docs(&container, &[1, 2]).await;

    struct Exploding;
    #[async_trait]
    impl Stage<Doc> for Exploding {
        async fn execute(
            &self,
            _ctx: &mut IndexQueryContext<'_, Doc>,
            _candidates: Option<&CandidateSet>,
        ) -> Result<Vec<ScoredId>, StoreError> {
            panic!("stage after an empty result must not run");
        }
    }

    let stages: Vec<Box<dyn Stage<Doc>>> =
        vec![Box::new(FixedStage { rows: vec![] }), Box::new(Exploding)];
    let results = container.fusion_query(&auth(), &stages).await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn candidate_requiring_stage_cannot_lead() {
    let container = container().await;
    let stages: Vec<Box<dyn Stage<Doc>>> = vec![Box::new(RankStage::descending("rating"))];
    let result = container.fusion_query(&auth(), &stages).await;
    assert!(matches!(result, Err(StoreError::InvalidPlan(_))));
}

/// Filter -> rank over live records: rank maps positions to 1 - i/(n-1) and
/// drops candidates lacking the field.
#[tokio::test]
async fn filter_then_rank_scores_by_field() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Doc>()?;
    let auth = auth();
    for (id, rating) in [(1, 0.5), (2, 2.0), (3, 1.0)] {
        store
            .insert(&auth, &Doc { id, topic: "news".into(), rating, embedding: vec![0.0; DOC_DIM] })
            .await?;
    }
    store.insert(&auth, &Doc { id: 4, topic: "sport".into(), rating: 9.0, embedding: vec![0.0; DOC_DIM] }).await?;

    let stages: Vec<Box<dyn Stage<Doc>>> = vec![
        Box::new(FilterStage::new("doc_topic", vec![FieldPredicate::eq("topic", "news")])),
        Box::new(RankStage::descending("rating")),
    ];
    let results = container.fusion_query(&auth, &stages).await?;
    let order: Vec<i64> = results.iter().map(|r| r.item.id).collect();
    // Highest rating first among topic=news; doc 4 never entered the candidate set.
    assert_eq!(order[0], 2);
    assert!(!order.contains(&4));
    Ok(())
}

#[tokio::test]
async fn predicate_stage_filters_fetched_candidates() -> anyhow::Result<()> {
    let container = container().await;
    seeded_docs(&container, &[1, 2, 3]).await;

    let stages: Vec<Box<dyn Stage<Doc>>> = vec![
        Box::new(FixedStage { rows: vec![(1, 1.0), (2, 1.0), (3, 1.0)] }),
        Box::new(PredicateStage::new(|doc: &Doc| doc.rating >= 2.0)),
    ];
    let results = container.fusion_query(&auth(), &stages).await?;
    let mut ids: Vec<i64> = results.iter().map(|r| r.item.id).collect();
    ids.sort();
    assert_eq!(ids, vec![2, 3]);
    Ok(())
}
