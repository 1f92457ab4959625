//! Change notification for single records: a lazy sequence of watch events driven
//! by the engine's key watches. On each trigger the current value is re-read, the
//! event emitted, and the watch re-armed, so rapid updates may coalesce — the
//! guarantee is "something changed since last arm", in commit-version order.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::StoreError;
use crate::item::{Item, ItemId};
use crate::kv::ReadMode;
use crate::store::{self, ItemStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent<T> {
    pub kind: WatchEventKind,
    pub new_value: Option<T>,
}

/// Handle to an active watch. Dropping it cancels the feed.
pub struct WatchStream<T> {
    rx: mpsc::Receiver<Result<WatchEvent<T>, StoreError>>,
    task: JoinHandle<()>,
}

impl<T> WatchStream<T> {
    /// Next event, or `None` after the feed terminated.
    pub async fn next(&mut self) -> Option<Result<WatchEvent<T>, StoreError>> { self.rx.recv().await }
}

impl<T> Drop for WatchStream<T> {
    fn drop(&mut self) { self.task.abort(); }
}

impl<T: Item> ItemStore<T> {
    /// Watch one record's primary key.
    pub fn watch(&self, id: &ItemId) -> WatchStream<T> {
        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let id = id.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = run_watch(&store, &id, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        WatchStream { rx, task }
    }
}

async fn run_watch<T: Item>(
    store: &ItemStore<T>,
    id: &ItemId,
    tx: &mpsc::Sender<Result<WatchEvent<T>, StoreError>>,
) -> Result<(), StoreError> {
    let key = store.record_key(id);
    let mut last = read_raw(store, &key).await?;

    loop {
        // Arm before re-reading so a commit between the two is not lost.
        let watch = store.inner.engine.watch(&key).await?;

        let current = read_raw(store, &key).await?;
        if current != last {
            let kind = match (&last, &current) {
                (None, Some(_)) => WatchEventKind::Created,
                (Some(_), None) => WatchEventKind::Deleted,
                _ => WatchEventKind::Updated,
            };
            let new_value = current.as_ref().map(|r| r.decode_item::<T>()).transpose()?;
            if tx.send(Ok(WatchEvent { kind, new_value })).await.is_err() {
                // Receiver dropped: cancellation.
                return Ok(());
            }
            last = current;
        }

        let version = watch.triggered().await?;
        debug!(id = %id, version, "watch triggered");
    }
}

async fn read_raw<T: Item>(store: &ItemStore<T>, key: &[u8]) -> Result<Option<store::StoredRecord>, StoreError> {
    let mut txn = store.inner.engine.begin().await?;
    store::read_record(txn.as_mut(), &store.inner.keyspace, key, ReadMode::Snapshot).await
}
