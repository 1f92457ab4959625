//! Oversized values: chunk split, placeholder envelope, reassembly, and atomic
//! cleanup of the blob subspace.

mod common;

use common::*;
use quarry::keyspace::REGION_BLOBS;
use quarry::kv::{KvEngine, RangeOptions};
use quarry::StoreError;

async fn blob_region_keys(container: &Container) -> Vec<Vec<u8>> {
    let (begin, end) = container.keyspace().root().child(&[REGION_BLOBS]).range();
    let mut txn = container.engine().begin().await.unwrap();
    txn.get_range(&begin, &end, RangeOptions::snapshot()).await.unwrap().into_iter().map(|(k, _)| k).collect()
}

#[tokio::test]
async fn large_values_chunk_and_round_trip() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Payload>()?;
    let auth = auth();

    let data: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();
    store.insert(&auth, &Payload { id: 1, data: data.clone() }).await?;

    // 200 KiB of payload exceeds the 90 KiB inline limit and splits into
    // 80 KiB chunks: three of them.
    let chunks = blob_region_keys(&container).await;
    assert_eq!(chunks.len(), 3);

    let fetched = store.fetch_by_id(&auth, &ItemId::int(1)).await?;
    assert_eq!(fetched.data, data);
    Ok(())
}

#[tokio::test]
async fn small_values_stay_inline() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Payload>()?;
    let auth = auth();

    store.insert(&auth, &Payload { id: 2, data: vec![7u8; 1024] }).await?;
    assert!(blob_region_keys(&container).await.is_empty());
    assert_eq!(store.fetch_by_id(&auth, &ItemId::int(2)).await?.data.len(), 1024);
    Ok(())
}

#[tokio::test]
async fn delete_clears_every_chunk() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Payload>()?;
    let auth = auth();

    store.insert(&auth, &Payload { id: 3, data: vec![1u8; 300 * 1024] }).await?;
    assert!(!blob_region_keys(&container).await.is_empty());

    store.delete(&auth, &ItemId::int(3)).await?;
    assert!(blob_region_keys(&container).await.is_empty());
    assert!(matches!(store.fetch_by_id(&auth, &ItemId::int(3)).await, Err(StoreError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn shrinking_a_value_drops_stale_chunks() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<Payload>()?;
    let auth = auth();

    store.insert(&auth, &Payload { id: 4, data: vec![9u8; 250 * 1024] }).await?;
    let before = blob_region_keys(&container).await.len();
    assert!(before >= 4);

    // Rewriting with an inline-sized value must leave zero chunks behind.
    store.save(&auth, &Payload { id: 4, data: vec![9u8; 10] }).await?;
    assert!(blob_region_keys(&container).await.is_empty());
    assert_eq!(store.fetch_by_id(&auth, &ItemId::int(4)).await?.data.len(), 10);
    Ok(())
}
