//! The ordered-KV engine contract the core consumes.
//!
//! The store is an external collaborator: it provides ACID transactions with
//! versioned reads, estimated range sizes, and atomic key watches. Engines live in
//! their own crates (see `quarry-storage-sled`); the core only ever sees these
//! traits.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::KvError;

pub type KvPair = (Vec<u8>, Vec<u8>);

/// How a read registers with conflict detection.
///
/// `Snapshot` reads see the same data but add no read-conflict range, which keeps
/// long index scans from aborting concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Serializable,
    Snapshot,
}

#[derive(Debug, Clone, Copy)]
pub struct RangeOptions {
    pub mode: ReadMode,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl Default for RangeOptions {
    fn default() -> Self { Self { mode: ReadMode::Serializable, limit: None, reverse: false } }
}

impl RangeOptions {
    pub fn snapshot() -> Self { Self { mode: ReadMode::Snapshot, ..Default::default() } }
    pub fn with_limit(self, limit: usize) -> Self { Self { limit: Some(limit), ..self } }
    pub fn reversed(self) -> Self { Self { reverse: true, ..self } }
}

#[async_trait]
pub trait KvEngine: Send + Sync {
    /// Open a transaction pinned to the engine's current read version.
    async fn begin(&self) -> Result<Box<dyn KvTransaction>, KvError>;

    /// Cheap size estimate for `[begin, end)`; an empty `end` means unbounded.
    async fn estimated_range_size(&self, begin: &[u8], end: &[u8]) -> Result<u64, KvError>;

    /// Register a watch that fires on the next commit touching `key`.
    async fn watch(&self, key: &[u8]) -> Result<KvWatch, KvError>;
}

/// One transaction. Writes are buffered and become visible atomically on commit;
/// reads observe the transaction's own writes. In range calls an empty `end`
/// means "to the end of the keyspace".
#[async_trait]
pub trait KvTransaction: Send {
    /// The commit version this transaction reads at.
    fn read_version(&self) -> u64;

    async fn get(&mut self, key: &[u8], mode: ReadMode) -> Result<Option<Vec<u8>>, KvError>;

    async fn get_range(&mut self, begin: &[u8], end: &[u8], opts: RangeOptions) -> Result<Vec<KvPair>, KvError>;

    fn set(&mut self, key: &[u8], value: &[u8]);

    fn clear(&mut self, key: &[u8]);

    fn clear_range(&mut self, begin: &[u8], end: &[u8]);

    /// Serializable commit. Returns the commit version, or `KvError::Conflict`
    /// when another commit intersected this transaction's reads.
    async fn commit(self: Box<Self>) -> Result<u64, KvError>;
}

/// Handle to a registered key watch. Watches coalesce: a trigger means "something
/// changed since the watch was armed", not one event per update.
pub struct KvWatch {
    rx: oneshot::Receiver<u64>,
}

/// Engine-side sender half of a watch.
pub struct KvWatchSender {
    tx: oneshot::Sender<u64>,
}

impl KvWatch {
    pub fn channel() -> (KvWatchSender, KvWatch) {
        let (tx, rx) = oneshot::channel();
        (KvWatchSender { tx }, KvWatch { rx })
    }

    /// Wait for the watch to fire; yields the triggering commit version.
    pub async fn triggered(self) -> Result<u64, KvError> {
        self.rx.await.map_err(|_| KvError::Unavailable("watch dropped by engine".to_string().into()))
    }
}

impl KvWatchSender {
    pub fn fire(self, commit_version: u64) { let _ = self.tx.send(commit_version); }

    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}
