mod common;

use common::*;
use quarry::StoreError;

#[tokio::test]
async fn insert_scan_delete() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    store.insert(&auth, &User::new(1, 18, "jp", "Tokyo")).await?;
    store.insert(&auth, &User::new(2, 42, "jp", "Osaka")).await?;

    let hits = store.fetch(&auth, &Query::filter(vec![FieldPredicate::eq("age", 42i64)])).await?;
    assert_eq!(ids(&hits), vec![ItemId::int(2)]);

    store.delete(&auth, &ItemId::int(2)).await?;
    let hits = store.fetch(&auth, &Query::filter(vec![FieldPredicate::eq("age", 42i64)])).await?;
    assert!(hits.is_empty());

    // Idempotent: deleting again is a no-op.
    store.delete(&auth, &ItemId::int(2)).await?;
    Ok(())
}

#[tokio::test]
async fn insert_rejects_duplicate_keys() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    store.insert(&auth, &User::new(7, 30, "jp", "Kyoto")).await?;
    let duplicate = store.insert(&auth, &User::new(7, 31, "jp", "Nara")).await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateKey(_))));

    // The original record is untouched.
    let user = store.fetch_by_id(&auth, &ItemId::int(7)).await?;
    assert_eq!(user.age, 30);
    Ok(())
}

#[tokio::test]
async fn save_moves_index_entries() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    let mut user = User::new(3, 25, "de", "Berlin");
    store.insert(&auth, &user).await?;

    user.age = 26;
    store.save(&auth, &user).await?;

    let age_25 = store.fetch(&auth, &Query::filter(vec![FieldPredicate::eq("age", 25i64)])).await?;
    assert!(age_25.is_empty());
    let age_26 = store.fetch(&auth, &Query::filter(vec![FieldPredicate::eq("age", 26i64)])).await?;
    assert_eq!(ids(&age_26), vec![ItemId::int(3)]);
    Ok(())
}

#[tokio::test]
async fn save_upserts_missing_records() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    store.save(&auth, &User::new(9, 50, "fr", "Paris")).await?;
    assert_eq!(store.fetch_by_id(&auth, &ItemId::int(9)).await?.city, "Paris");
    Ok(())
}

#[tokio::test]
async fn fetch_by_id_not_found() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let missing = store.fetch_by_id(&auth(), &ItemId::int(404)).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn unknown_entity_type_is_rejected() {
    let container = container().await;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Stranger {
        id: i64,
    }
    impl Item for Stranger {
        fn type_name() -> &'static str { "stranger" }
        fn id(&self) -> ItemId { ItemId::int(self.id) }
        fn fields(&self) -> Vec<(&'static str, FieldValue)> { vec![] }
    }

    assert!(matches!(container.store::<Stranger>(), Err(StoreError::EntityNotFound(_))));
}

/// Index coherence: after an arbitrary mutation sequence, scanning an index
/// yields exactly the ids whose current records carry the keyed field.
#[tokio::test]
async fn index_scan_agrees_with_table_scan() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    for i in 0..20 {
        store.insert(&auth, &User::new(i, i % 5, "jp", "Tokyo")).await?;
    }
    for i in 0..10 {
        let mut user = store.fetch_by_id(&auth, &ItemId::int(i)).await?;
        user.age = (i + 1) % 5;
        store.save(&auth, &user).await?;
    }
    for i in 15..20 {
        store.delete(&auth, &ItemId::int(i)).await?;
    }

    let everything = store.fetch(&auth, &Query::new()).await?;
    for age in 0..5i64 {
        let indexed = store.fetch(&auth, &Query::filter(vec![FieldPredicate::eq("age", age)])).await?;
        let mut expected: Vec<ItemId> = everything.iter().filter(|u| u.age == age).map(|u| u.id()).collect();
        let mut got = ids(&indexed);
        expected.sort();
        got.sort();
        assert_eq!(got, expected, "age {}", age);
    }
    Ok(())
}

#[tokio::test]
async fn restricted_fields_are_masked_for_plain_readers() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;

    let elevated = AuthContext::elevated("admin");
    let mut user = User::new(5, 40, "us", "NYC");
    user.secret = "classified".into();
    store.insert(&elevated, &user).await?;

    let masked = store.fetch_by_id(&auth(), &ItemId::int(5)).await?;
    assert_eq!(masked.secret, "");
    let unmasked = store.fetch_by_id(&elevated, &ItemId::int(5)).await?;
    assert_eq!(unmasked.secret, "classified");

    // Projected reads of a read-restricted field are rejected outright.
    let denied = store.fetch_projected(&auth(), &Query::new().project(vec!["secret"])).await;
    assert!(matches!(denied, Err(StoreError::SecurityReadDenied(_))));
    Ok(())
}
