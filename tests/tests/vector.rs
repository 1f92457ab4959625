//! PQ vector index end-to-end: training, entry maintenance, ADC search quality.

mod common;

use common::*;
use quarry::pq::{PqParams, ProductQuantizer};
use quarry::{StoreError, VectorStage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()).collect()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// ADC approximates direct distance within 10% on average (d=8, m=4, 1000
/// training vectors).
#[test]
fn adc_tracks_direct_distance() {
    let training = random_vectors(1000, 8, 1);
    let mut pq = ProductQuantizer::new(8, PqParams::new(4).with_seed(5)).unwrap();
    pq.train(&training).unwrap();

    let samples = random_vectors(1000, 8, 2);
    let queries = random_vectors(1000, 8, 3);
    let mut total_relative_error = 0.0f64;
    for (v, q) in samples.iter().zip(&queries) {
        let code = pq.encode(v).unwrap();
        let adc = pq.distance_table(q).unwrap().distance(&code).unwrap() as f64;
        let direct = squared_l2(q, v) as f64;
        total_relative_error += (adc - direct).abs() / direct.max(1e-9);
    }
    let mean = total_relative_error / samples.len() as f64;
    assert!(mean < 0.10, "mean relative error {:.4}", mean);
}

#[tokio::test]
async fn knn_search_finds_the_nearest_records() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Doc>()?;
    let auth = auth();

    let vectors = random_vectors(200, DOC_DIM, 11);
    container.train_vector_index("doc_embedding", &vectors).await?;

    for (i, v) in vectors.iter().enumerate() {
        store
            .insert(&auth, &Doc { id: i as i64, topic: "t".into(), rating: 0.0, embedding: v.clone() })
            .await?;
    }

    // Query with an exact database vector: it must surface in the top results.
    let target = 17usize;
    let stage: Box<dyn quarry::Stage<Doc>> = Box::new(VectorStage::new("doc_embedding", vectors[target].clone(), 10));
    let results = container.fusion_query(&auth, std::slice::from_ref(&stage)).await?;
    assert_eq!(results.len(), 10);
    assert!(
        results.iter().take(3).any(|r| r.item.id == target as i64),
        "target not in top 3: {:?}",
        results.iter().map(|r| r.item.id).collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn vector_entries_follow_record_lifecycle() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Doc>()?;
    let auth = auth();

    container.train_vector_index("doc_embedding", &random_vectors(300, DOC_DIM, 21)).await?;

    let a = Doc { id: 1, topic: "x".into(), rating: 0.0, embedding: vec![0.0; DOC_DIM] };
    let b = Doc { id: 2, topic: "x".into(), rating: 0.0, embedding: vec![1.0; DOC_DIM] };
    store.insert(&auth, &a).await?;
    store.insert(&auth, &b).await?;

    let stage: Box<dyn quarry::Stage<Doc>> = Box::new(VectorStage::new("doc_embedding", vec![0.0; DOC_DIM], 1));
    let nearest = container.fusion_query(&auth, std::slice::from_ref(&stage)).await?;
    assert_eq!(nearest[0].item.id, 1);

    store.delete(&auth, &ItemId::int(1)).await?;
    let nearest = container.fusion_query(&auth, std::slice::from_ref(&stage)).await?;
    assert_eq!(nearest[0].item.id, 2);
    Ok(())
}

#[tokio::test]
async fn search_before_training_reports_not_trained() -> anyhow::Result<()> {
    let container = container().await;
    let auth = auth();
    let stage: Box<dyn quarry::Stage<Doc>> = Box::new(VectorStage::new("doc_embedding", vec![0.0; DOC_DIM], 5));
    let result = container.fusion_query(&auth, std::slice::from_ref(&stage)).await;
    assert!(matches!(result, Err(StoreError::Pq(quarry::pq::PqError::NotTrained))));
    Ok(())
}

#[tokio::test]
async fn wrong_dimension_vectors_are_rejected() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Doc>()?;
    let auth = auth();

    container.train_vector_index("doc_embedding", &random_vectors(300, DOC_DIM, 31)).await?;
    let wrong = Doc { id: 9, topic: "x".into(), rating: 0.0, embedding: vec![0.0; DOC_DIM + 1] };
    let result = store.insert(&auth, &wrong).await;
    assert!(matches!(result, Err(StoreError::Pq(quarry::pq::PqError::DimensionMismatch { .. }))));
    Ok(())
}
