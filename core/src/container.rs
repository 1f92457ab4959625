//! The container binds a schema to a KV engine handle and hands out typed store
//! handles. It is shared read-only across tasks after initialization.

use std::sync::Arc;

use quarry_pq::ProductQuantizer;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::fusion::{FusionEngine, ScoredResult, Stage};
use crate::index::{self, vector, IndexQueryContext, IndexState, IndexStatus};
use crate::item::{AuthContext, Item, ItemId};
use crate::keyspace::KeySpace;
use crate::kv::{KvEngine, KvTransaction, RangeOptions, ReadMode};
use crate::plan::{CardinalityHints, CostModel};
use crate::retry::{with_retry, RetryConfig};
use crate::schema::{EntityDescriptor, IndexDescriptor, IndexKind, Schema};
use crate::store::{self, ItemStore};

pub(crate) struct ContainerInner {
    pub(crate) engine: Arc<dyn KvEngine>,
    pub(crate) schema: Schema,
    pub(crate) keyspace: KeySpace,
    pub(crate) retry: RetryConfig,
    pub(crate) cost: CostModel,
    pub(crate) hints: CardinalityHints,
}

#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

impl Container {
    /// Bind `schema` to an engine under the given root prefix (normally the
    /// directory subspace resolved for this container).
    pub fn new(engine: Arc<dyn KvEngine>, schema: Schema, root_prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                engine,
                schema,
                keyspace: KeySpace::new(root_prefix),
                retry: RetryConfig::default(),
                cost: CostModel::default(),
                hints: CardinalityHints::default(),
            }),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        Arc::get_mut(&mut self.inner).expect("configure before sharing").retry = retry;
        self
    }

    pub fn with_cost_model(mut self, cost: CostModel) -> Self {
        Arc::get_mut(&mut self.inner).expect("configure before sharing").cost = cost;
        self
    }

    pub fn with_hints(mut self, hints: CardinalityHints) -> Self {
        Arc::get_mut(&mut self.inner).expect("configure before sharing").hints = hints;
        self
    }

    pub fn schema(&self) -> &Schema { &self.inner.schema }

    pub fn keyspace(&self) -> &KeySpace { &self.inner.keyspace }

    pub fn engine(&self) -> &Arc<dyn KvEngine> { &self.inner.engine }

    /// Typed store handle; `EntityNotFound` when the schema lacks the type.
    pub fn store<T: Item>(&self) -> Result<ItemStore<T>, StoreError> {
        let entity = self.inner.schema.entity(T::type_name())?.clone();
        Ok(ItemStore::new(self.inner.clone(), entity))
    }

    /// Bring every registered index to `ready`: missing state enters `building`
    /// and gets a full rebuild. Vector indexes without trained codebooks stay
    /// `building` until [`Container::train_vector_index`] runs.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        for entity in self.inner.schema.entities() {
            for index in &entity.indexes {
                let mut txn = self.inner.engine.begin().await?;
                let status = index::load_status(txn.as_mut(), &self.inner.keyspace, &index.name).await?;
                if matches!(status, Some(IndexStatus { state: IndexState::Ready, .. })) {
                    continue;
                }
                if !index.has_entries() {
                    // Rank and text kinds keep no entries; they are ready by definition.
                    let built_through_version = txn.read_version();
                    index::save_status(
                        txn.as_mut(),
                        &self.inner.keyspace,
                        &index.name,
                        IndexStatus { state: IndexState::Ready, built_through_version },
                    );
                    txn.commit().await?;
                    continue;
                }
                if let IndexKind::VectorPq { .. } = index.kind {
                    if vector::load_codec(txn.as_mut(), &self.inner.keyspace, &index.name).await?.is_none() {
                        index::save_status(
                            txn.as_mut(),
                            &self.inner.keyspace,
                            &index.name,
                            IndexStatus { state: IndexState::Building, built_through_version: 0 },
                        );
                        txn.commit().await?;
                        continue;
                    }
                }
                drop(txn);
                self.rebuild_index(&index.name).await?;
            }
        }
        Ok(())
    }

    /// Full rebuild: clear the entry subspace, rescan every record of the owning
    /// entity, rewrite entries, and stamp `built_through_version` with the
    /// rebuild transaction's read version. Marks the index `failed` on error.
    pub async fn rebuild_index(&self, index_name: &str) -> Result<(), StoreError> {
        let (entity, index) = self.inner.schema.index(index_name)?;
        let (entity, index) = (entity.clone(), index.clone());
        if !index.has_entries() {
            return Err(StoreError::SchemaMismatch(format!("index '{}' keeps no entries to rebuild", index_name)));
        }

        let result = with_retry!(&self.inner.retry, self.try_rebuild(&entity, &index).await);
        if let Err(e) = &result {
            warn!(index = index_name, error = %e, "index rebuild failed");
            if let Ok(mut txn) = self.inner.engine.begin().await {
                index::save_status(
                    txn.as_mut(),
                    &self.inner.keyspace,
                    index_name,
                    IndexStatus { state: IndexState::Failed, built_through_version: 0 },
                );
                let _ = txn.commit().await;
            }
        }
        result
    }

    async fn try_rebuild(&self, entity: &EntityDescriptor, index: &IndexDescriptor) -> Result<(), StoreError> {
        let ks = &self.inner.keyspace;
        let mut txn = self.inner.engine.begin().await?;
        let built_through_version = txn.read_version();

        index::save_status(txn.as_mut(), ks, &index.name, IndexStatus { state: IndexState::Building, built_through_version: 0 });

        let (begin, end) = ks.index(&index.name).range();
        txn.clear_range(&begin, &end);

        // Serializable reads: a record mutated mid-rebuild conflicts the rebuild
        // instead of racing it, so `ready` really means built through this version.
        let records = ks.records(&entity.type_name);
        let (r_begin, r_end) = records.range();
        let pairs = txn.get_range(&r_begin, &r_end, RangeOptions::default()).await?;
        let mut rebuilt = 0u64;
        for (key, _) in pairs {
            let id = ItemId::from_values(&records.unpack(&key)?)?;
            let Some(record) = store::read_record(txn.as_mut(), ks, &key, ReadMode::Serializable).await? else {
                continue;
            };
            index::apply_maintenance(txn.as_mut(), ks, entity, &id, None, Some(&record.fields)).await?;
            rebuilt += 1;
        }

        index::save_status(txn.as_mut(), ks, &index.name, IndexStatus { state: IndexState::Ready, built_through_version });
        txn.commit().await?;
        debug!(index = %index.name, rebuilt, "index rebuilt");
        Ok(())
    }

    /// Drop an index: tombstone it under `S/F`, then clear its entries, state,
    /// and metadata and remove the tombstone. A crash between the two commits
    /// leaves the tombstone for the next cleanup pass.
    pub async fn drop_index(&self, index_name: &str) -> Result<(), StoreError> {
        self.inner.schema.index(index_name)?;
        let ks = &self.inner.keyspace;

        let mut txn = self.inner.engine.begin().await?;
        txn.set(&ks.former_index_key(index_name), &[]);
        txn.commit().await?;

        let mut txn = self.inner.engine.begin().await?;
        let (begin, end) = ks.index(index_name).range();
        txn.clear_range(&begin, &end);
        let (m_begin, m_end) = ks.index_meta(index_name).range();
        txn.clear_range(&m_begin, &m_end);
        txn.clear(&ks.index_state_key(index_name));
        txn.clear(&ks.former_index_key(index_name));
        txn.commit().await?;
        Ok(())
    }

    /// Train a vector index's PQ codec and rebuild its entries.
    pub async fn train_vector_index(&self, index_name: &str, training: &[Vec<f32>]) -> Result<(), StoreError> {
        let (_, index) = self.inner.schema.index(index_name)?;
        let IndexKind::VectorPq { dim, params } = index.kind else {
            return Err(StoreError::SchemaMismatch(format!("index '{}' is not a vector index", index_name)));
        };

        let mut codec = ProductQuantizer::new(dim, params)?;
        codec.train(training)?;

        let mut txn = self.inner.engine.begin().await?;
        vector::store_codec(txn.as_mut(), &self.inner.keyspace, index_name, &codec)?;
        txn.commit().await?;

        self.rebuild_index(index_name).await
    }

    /// Run a fusion pipeline against one entity within a single transaction.
    pub async fn fusion_query<T: Item>(
        &self,
        auth: &AuthContext,
        stages: &[Box<dyn Stage<T>>],
    ) -> Result<Vec<ScoredResult<T>>, StoreError> {
        let entity = self.inner.schema.entity(T::type_name())?;
        let mut txn: Box<dyn KvTransaction> = self.inner.engine.begin().await?;
        let mut ctx = IndexQueryContext::new(txn.as_mut(), &self.inner.keyspace, entity);
        let results = FusionEngine::new().run(&mut ctx, stages).await?;
        Ok(results.into_iter().map(|r| ScoredResult { item: r.item.mask(auth), score: r.score }).collect())
    }
}
