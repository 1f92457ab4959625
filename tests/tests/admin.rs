//! Administrative surface: statistics, explain, index rebuild and drop.

mod common;

use common::*;
use quarry::keyspace::REGION_INDEXES;
use quarry::kv::{KvEngine, RangeOptions};
use quarry::{IndexState, PlanNode, StoreError};

async fn index_entry_count(container: &Container, index: &str) -> usize {
    let (begin, end) = container.keyspace().index(index).range();
    let mut txn = container.engine().begin().await.unwrap();
    txn.get_range(&begin, &end, RangeOptions::snapshot()).await.unwrap().len()
}

#[tokio::test]
async fn collection_statistics_count_items_and_bytes() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();
    for i in 0..4 {
        store.insert(&auth, &User::new(i, 20 + i, "jp", "Tokyo")).await?;
    }

    let stats = container.collection_statistics("user").await?;
    assert_eq!(stats.item_count, 4);
    assert!(stats.estimated_byte_size > 0);

    // Persisted statistics round-trip through the metadata subspace.
    let persisted = container.update_statistics("user").await?;
    assert_eq!(container.persisted_statistics("user").await?, Some(persisted));

    assert!(matches!(container.collection_statistics("nope").await, Err(StoreError::EntityNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn index_statistics_report_state_and_entries() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();
    for i in 0..3 {
        store.insert(&auth, &User::new(i, 30, "jp", "Tokyo")).await?;
    }

    let stats = container.index_statistics("user_age").await?;
    assert_eq!(stats.state, IndexState::Ready);
    assert_eq!(stats.entry_count, 3);
    assert_eq!(stats.kind, "scalar");

    // Best-effort enumeration covers every registered index, including the
    // untrained vector index (reported as building, not an error).
    let all = container.all_index_statistics().await?;
    let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"user_age"));
    assert!(names.contains(&"user_geo"));
    assert!(names.contains(&"doc_embedding"));
    let vector = all.iter().find(|s| s.name == "doc_embedding").unwrap();
    assert_eq!(vector.state, IndexState::Building);
    Ok(())
}

#[tokio::test]
async fn rebuild_backfills_preexisting_records() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();
    for i in 0..5 {
        store.insert(&auth, &User::new(i, 30, "jp", "Tokyo")).await?;
    }

    let before = container.index_statistics("user_age").await?;
    container.rebuild_index("user_age").await?;
    let after = container.index_statistics("user_age").await?;

    assert_eq!(after.entry_count, 5);
    assert_eq!(after.state, IndexState::Ready);
    assert!(after.built_through_version >= before.built_through_version);
    Ok(())
}

#[tokio::test]
async fn drop_index_clears_entries_state_and_tombstone() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();
    for i in 0..3 {
        store.insert(&auth, &User::new(i, 40, "de", "Berlin")).await?;
    }
    assert!(index_entry_count(&container, "user_age").await > 0);

    container.drop_index("user_age").await?;
    assert_eq!(index_entry_count(&container, "user_age").await, 0);

    // No tombstone left behind, and the other index is untouched.
    let mut txn = container.engine().begin().await?;
    let tombstone = txn.get(&container.keyspace().former_index_key("user_age"), quarry::ReadMode::Snapshot).await?;
    assert!(tombstone.is_none());
    assert!(index_entry_count(&container, "user_geo").await > 0);
    Ok(())
}

#[tokio::test]
async fn explain_reports_the_chosen_plan_without_executing() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;

    let plan = store.plan(&Query::filter(vec![FieldPredicate::eq("country", "jp"), FieldPredicate::eq("city", "Tokyo")]));
    assert!(matches!(plan.node, PlanNode::IndexSeek { .. }));
    assert!(plan.cost > 0.0);

    let plan = store.plan(&Query::filter(vec![FieldPredicate::eq("city", "Tokyo")]));
    assert!(matches!(plan.node, PlanNode::TableScan { .. }));
    Ok(())
}

#[tokio::test]
async fn index_regions_stay_disjoint_per_index() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();
    store.insert(&auth, &User::new(1, 20, "jp", "Tokyo")).await?;

    // All entries live under `I`, partitioned by packed index name.
    let (begin, end) = container.keyspace().root().child(&[REGION_INDEXES]).range();
    let mut txn = container.engine().begin().await?;
    let all = txn.get_range(&begin, &end, RangeOptions::snapshot()).await?;
    let age = index_entry_count(&container, "user_age").await;
    let geo = index_entry_count(&container, "user_geo").await;
    assert_eq!(all.len(), age + geo);
    Ok(())
}
