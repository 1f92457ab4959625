//! Administrative introspection: collection and index statistics computed from
//! estimated range sizes and entry counts, persisted on demand under `S`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::container::Container;
use crate::error::StoreError;
use crate::index::{self, IndexState, IndexStatus};
use crate::kv::{KvTransaction, RangeOptions, ReadMode};
use crate::schema::IndexDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatistics {
    pub type_name: String,
    pub item_count: u64,
    pub estimated_byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatistics {
    pub name: String,
    pub kind: &'static str,
    pub state: IndexState,
    pub built_through_version: u64,
    pub entry_count: u64,
    pub estimated_byte_size: u64,
}

impl Container {
    pub async fn collection_statistics(&self, type_name: &str) -> Result<CollectionStatistics, StoreError> {
        let entity = self.inner.schema.entity(type_name)?;
        let subspace = self.inner.keyspace.records(&entity.type_name);
        let (begin, end) = subspace.range();

        let estimated_byte_size = self.inner.engine.estimated_range_size(&begin, &end).await?;
        let mut txn = self.inner.engine.begin().await?;
        let item_count = txn.get_range(&begin, &end, RangeOptions::snapshot()).await?.len() as u64;

        Ok(CollectionStatistics { type_name: type_name.to_string(), item_count, estimated_byte_size })
    }

    /// Recompute and persist collection statistics under `S/stats/<type>`.
    pub async fn update_statistics(&self, type_name: &str) -> Result<CollectionStatistics, StoreError> {
        let stats = self.collection_statistics(type_name).await?;
        let mut txn = self.inner.engine.begin().await?;
        txn.set(&self.inner.keyspace.statistics_key(type_name), &bincode::serialize(&stats)?);
        txn.commit().await?;
        Ok(stats)
    }

    /// Statistics persisted by the last [`Container::update_statistics`] run.
    pub async fn persisted_statistics(&self, type_name: &str) -> Result<Option<CollectionStatistics>, StoreError> {
        let mut txn = self.inner.engine.begin().await?;
        match txn.get(&self.inner.keyspace.statistics_key(type_name), ReadMode::Snapshot).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn index_statistics(&self, index_name: &str) -> Result<IndexStatistics, StoreError> {
        let (_, index) = self.inner.schema.index(index_name)?;
        let index = index.clone();
        let mut txn = self.inner.engine.begin().await?;
        self.index_statistics_in(txn.as_mut(), &index).await
    }

    async fn index_statistics_in(&self, txn: &mut dyn KvTransaction, index: &IndexDescriptor) -> Result<IndexStatistics, StoreError> {
        let status = index::load_status(txn, &self.inner.keyspace, &index.name)
            .await?
            .unwrap_or(IndexStatus { state: IndexState::Building, built_through_version: 0 });

        let (begin, end) = self.inner.keyspace.index(&index.name).range();
        let entry_count = txn.get_range(&begin, &end, RangeOptions::snapshot()).await?.len() as u64;
        let estimated_byte_size = self.inner.engine.estimated_range_size(&begin, &end).await?;

        Ok(IndexStatistics {
            name: index.name.clone(),
            kind: index.kind.label(),
            state: status.state,
            built_through_version: status.built_through_version,
            entry_count,
            estimated_byte_size,
        })
    }

    /// Best-effort enumeration over every registered index. A failing index is
    /// logged and skipped — the one place errors are deliberately swallowed.
    pub async fn all_index_statistics(&self) -> Result<Vec<IndexStatistics>, StoreError> {
        let mut out = Vec::new();
        for entity in self.inner.schema.entities() {
            for index in &entity.indexes {
                let mut txn = self.inner.engine.begin().await?;
                match self.index_statistics_in(txn.as_mut(), index).await {
                    Ok(stats) => out.push(stats),
                    Err(e) => warn!(index = %index.name, error = %e, "skipping index in statistics enumeration"),
                }
            }
        }
        Ok(out)
    }
}
