use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound as RangeBound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use sled::{Config, Db, Tree};
use tracing::trace;

use quarry_core::error::KvError;
use quarry_core::kv::{KvEngine, KvPair, KvTransaction, KvWatch, KvWatchSender, RangeOptions, ReadMode};

/// Committed write sets retained for conflict checking. Transactions older than
/// the retained window abort conservatively.
const RECENT_COMMITS_CAP: usize = 1024;

const META_TREE: &str = "__quarry_meta";
const DATA_TREE: &str = "__quarry_data";
const VERSION_KEY: &[u8] = b"commit_version";

fn sled_err(e: sled::Error) -> KvError { KvError::unavailable(e) }

/// A read or write footprint. An empty range end means "unbounded".
#[derive(Debug, Clone)]
enum Footprint {
    Key(Vec<u8>),
    Range(Vec<u8>, Vec<u8>),
}

impl Footprint {
    fn contains(&self, key: &[u8]) -> bool {
        match self {
            Footprint::Key(k) => k == key,
            Footprint::Range(begin, end) => key >= begin.as_slice() && (end.is_empty() || key < end.as_slice()),
        }
    }

    fn intersects(&self, other: &Footprint) -> bool {
        match (self, other) {
            (Footprint::Key(k), _) => other.contains(k),
            (_, Footprint::Key(k)) => self.contains(k),
            (Footprint::Range(a_begin, a_end), Footprint::Range(b_begin, b_end)) => {
                let a_open = a_end.is_empty();
                let b_open = b_end.is_empty();
                (a_open || b_begin < a_end) && (b_open || a_begin < b_end)
            }
        }
    }
}

struct CommitRecord {
    version: u64,
    writes: Vec<Footprint>,
}

struct RecentCommits {
    queue: VecDeque<CommitRecord>,
    /// Highest version evicted from the queue; older readers cannot be verified.
    pruned_through: u64,
}

struct EngineShared {
    data: Tree,
    meta: Tree,
    // Held open so temporary databases live as long as the engine.
    _db: Db,
    version: AtomicU64,
    commit_lock: Mutex<()>,
    recent: Mutex<RecentCommits>,
    watches: DashMap<Vec<u8>, Vec<KvWatchSender>>,
}

/// Ordered-KV engine over a sled tree. Commits are serialized behind one lock;
/// isolation comes from optimistic read-set validation against the recent commit
/// window, which upgrades snapshot reads to serializable on conflict.
#[derive(Clone)]
pub struct SledKvEngine {
    shared: Arc<EngineShared>,
}

impl SledKvEngine {
    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory engine for tests.
    pub fn new_test() -> anyhow::Result<Self> {
        let db = Config::new().temporary(true).flush_every_ms(None).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> anyhow::Result<Self> {
        let data = db.open_tree(DATA_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let version = match meta.get(VERSION_KEY)? {
            Some(bytes) => u64::from_be_bytes(bytes.as_ref().try_into()?),
            None => 0,
        };
        Ok(Self {
            shared: Arc::new(EngineShared {
                data,
                meta,
                _db: db,
                version: AtomicU64::new(version),
                commit_lock: Mutex::new(()),
                recent: Mutex::new(RecentCommits { queue: VecDeque::new(), pruned_through: version }),
                watches: DashMap::new(),
            }),
        })
    }
}

#[async_trait]
impl KvEngine for SledKvEngine {
    async fn begin(&self) -> Result<Box<dyn KvTransaction>, KvError> {
        Ok(Box::new(SledKvTransaction {
            shared: self.shared.clone(),
            read_version: self.shared.version.load(Ordering::SeqCst),
            reads: Vec::new(),
            writes: BTreeMap::new(),
            cleared: Vec::new(),
        }))
    }

    async fn estimated_range_size(&self, begin: &[u8], end: &[u8]) -> Result<u64, KvError> {
        let mut total = 0u64;
        for item in range_iter(&self.shared.data, begin, end) {
            let (key, value) = item.map_err(sled_err)?;
            total += (key.len() + value.len()) as u64;
        }
        Ok(total)
    }

    async fn watch(&self, key: &[u8]) -> Result<KvWatch, KvError> {
        let (sender, watch) = KvWatch::channel();
        let mut entry = self.shared.watches.entry(key.to_vec()).or_default();
        entry.retain(|s| !s.is_closed());
        entry.push(sender);
        Ok(watch)
    }
}

fn range_iter(tree: &Tree, begin: &[u8], end: &[u8]) -> sled::Iter {
    if end.is_empty() {
        tree.range((RangeBound::Included(begin.to_vec()), RangeBound::Unbounded))
    } else {
        tree.range(begin.to_vec()..end.to_vec())
    }
}

struct SledKvTransaction {
    shared: Arc<EngineShared>,
    read_version: u64,
    reads: Vec<Footprint>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    cleared: Vec<(Vec<u8>, Vec<u8>)>,
}

impl SledKvTransaction {
    fn in_cleared(&self, key: &[u8]) -> bool {
        self.cleared.iter().any(|(begin, end)| key >= begin.as_slice() && (end.is_empty() || key < end.as_slice()))
    }
}

#[async_trait]
impl KvTransaction for SledKvTransaction {
    fn read_version(&self) -> u64 { self.read_version }

    async fn get(&mut self, key: &[u8], mode: ReadMode) -> Result<Option<Vec<u8>>, KvError> {
        if mode == ReadMode::Serializable {
            self.reads.push(Footprint::Key(key.to_vec()));
        }
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        if self.in_cleared(key) {
            return Ok(None);
        }
        Ok(self.shared.data.get(key).map_err(sled_err)?.map(|v| v.to_vec()))
    }

    async fn get_range(&mut self, begin: &[u8], end: &[u8], opts: RangeOptions) -> Result<Vec<KvPair>, KvError> {
        if opts.mode == ReadMode::Serializable {
            self.reads.push(Footprint::Range(begin.to_vec(), end.to_vec()));
        }

        // Committed state, minus this transaction's range clears, plus its writes.
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in range_iter(&self.shared.data, begin, end) {
            let (key, value) = item.map_err(sled_err)?;
            if !self.in_cleared(&key) {
                merged.insert(key.to_vec(), value.to_vec());
            }
        }
        let window = (RangeBound::Included(begin.to_vec()), if end.is_empty() { RangeBound::Unbounded } else { RangeBound::Excluded(end.to_vec()) });
        for (key, op) in self.writes.range(window) {
            match op {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let mut pairs: Vec<KvPair> = merged.into_iter().collect();
        if opts.reverse {
            pairs.reverse();
        }
        if let Some(limit) = opts.limit {
            pairs.truncate(limit);
        }
        Ok(pairs)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) { self.writes.insert(key.to_vec(), Some(value.to_vec())); }

    fn clear(&mut self, key: &[u8]) { self.writes.insert(key.to_vec(), None); }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        let window = (RangeBound::Included(begin.to_vec()), if end.is_empty() { RangeBound::Unbounded } else { RangeBound::Excluded(end.to_vec()) });
        let stale: Vec<Vec<u8>> = self.writes.range(window).map(|(k, _)| k.clone()).collect();
        for key in stale {
            self.writes.remove(&key);
        }
        self.cleared.push((begin.to_vec(), end.to_vec()));
    }

    async fn commit(self: Box<Self>) -> Result<u64, KvError> {
        let shared = self.shared.clone();
        let _guard = shared.commit_lock.lock().expect("commit lock");

        // Validate the read set against every commit newer than our read version.
        {
            let recent = shared.recent.lock().expect("recent commits");
            if self.read_version < recent.pruned_through {
                return Err(KvError::Conflict);
            }
            for commit in recent.queue.iter().filter(|c| c.version > self.read_version) {
                for write in &commit.writes {
                    if self.reads.iter().any(|read| read.intersects(write)) {
                        trace!(commit = commit.version, "read-write conflict");
                        return Err(KvError::Conflict);
                    }
                }
            }
        }

        // Apply buffered operations atomically.
        let mut batch = sled::Batch::default();
        let mut footprints: Vec<Footprint> = Vec::with_capacity(self.writes.len() + self.cleared.len());
        for (begin, end) in &self.cleared {
            for item in range_iter(&shared.data, begin, end) {
                let (key, _) = item.map_err(sled_err)?;
                batch.remove(key);
            }
            footprints.push(Footprint::Range(begin.clone(), end.clone()));
        }
        for (key, op) in &self.writes {
            match op {
                Some(value) => batch.insert(key.clone(), value.clone()),
                None => batch.remove(key.clone()),
            }
            footprints.push(Footprint::Key(key.clone()));
        }
        shared.data.apply_batch(batch).map_err(sled_err)?;

        let version = shared.version.fetch_add(1, Ordering::SeqCst) + 1;
        shared.meta.insert(VERSION_KEY, version.to_be_bytes().to_vec()).map_err(sled_err)?;

        {
            let mut recent = shared.recent.lock().expect("recent commits");
            recent.queue.push_back(CommitRecord { version, writes: footprints.clone() });
            while recent.queue.len() > RECENT_COMMITS_CAP {
                let evicted = recent.queue.pop_front().expect("non-empty");
                recent.pruned_through = evicted.version;
            }
        }

        // Fan out to watches whose key this commit touched.
        shared.watches.retain(|key, senders| {
            if footprints.iter().any(|f| f.contains(key)) {
                for sender in senders.drain(..) {
                    sender.fire(version);
                }
                false
            } else {
                senders.retain(|s| !s.is_closed());
                !senders.is_empty()
            }
        });

        Ok(version)
    }
}
