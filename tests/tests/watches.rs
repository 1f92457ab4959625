//! Record watches: created/updated/deleted events in commit order, terminating
//! on handle drop.

mod common;

use common::*;
use quarry::{WatchEvent, WatchEventKind};
use std::time::Duration;

async fn next_event<T>(stream: &mut quarry::WatchStream<T>) -> WatchEvent<T> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("watch timed out")
        .expect("watch terminated")
        .expect("watch errored")
}

#[tokio::test]
async fn watch_observes_update_and_delete() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    let mut user = User::new(1, 30, "jp", "Tokyo");
    store.insert(&auth, &user).await?;

    let mut watch = store.watch(&ItemId::int(1));
    // Give the feed a moment to capture the baseline before mutating.
    tokio::time::sleep(Duration::from_millis(50)).await;

    user.age = 31;
    store.save(&auth, &user).await?;
    let event = next_event(&mut watch).await;
    assert_eq!(event.kind, WatchEventKind::Updated);
    assert_eq!(event.new_value.as_ref().map(|u| u.age), Some(31));

    store.delete(&auth, &ItemId::int(1)).await?;
    let event = next_event(&mut watch).await;
    assert_eq!(event.kind, WatchEventKind::Deleted);
    assert!(event.new_value.is_none());
    Ok(())
}

#[tokio::test]
async fn watch_observes_creation() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    let mut watch = store.watch(&ItemId::int(2));
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.insert(&auth, &User::new(2, 20, "de", "Berlin")).await?;
    let event = next_event(&mut watch).await;
    assert_eq!(event.kind, WatchEventKind::Created);
    assert_eq!(event.new_value.as_ref().map(|u| u.city.clone()), Some("Berlin".to_string()));
    Ok(())
}

#[tokio::test]
async fn rapid_updates_may_coalesce_but_converge() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    let mut user = User::new(3, 0, "fr", "Paris");
    store.insert(&auth, &user).await?;
    let mut watch = store.watch(&ItemId::int(3));
    tokio::time::sleep(Duration::from_millis(50)).await;

    for age in 1..=5 {
        user.age = age;
        store.save(&auth, &user).await?;
    }

    // Events may coalesce; the last observed value must converge to age 5.
    let mut last_seen = None;
    loop {
        let event = next_event(&mut watch).await;
        last_seen = event.new_value.map(|u| u.age);
        if last_seen == Some(5) {
            break;
        }
    }
    assert_eq!(last_seen, Some(5));
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_feed() -> anyhow::Result<()> {
    let container = container().await;
    let store = container.store::<User>()?;
    let auth = auth();

    store.insert(&auth, &User::new(4, 40, "us", "NYC")).await?;
    let watch = store.watch(&ItemId::int(4));
    drop(watch);

    // Mutations after the drop must not error or leak a task that panics.
    store.delete(&auth, &ItemId::int(4)).await?;
    Ok(())
}
