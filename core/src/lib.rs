//! Quarry core: typed record storage and multi-modal indexing over an ordered
//! key-value store with serializable transactions.

pub mod container;
pub mod error;
pub mod fusion;
pub mod index;
pub mod item;
pub mod keyspace;
pub mod kv;
pub mod metrics;
pub mod plan;
pub mod query;
pub mod retry;
pub mod schema;
pub mod stats;
pub mod store;
pub mod value;
pub mod watch;

pub use container::Container;
pub use error::{KvError, StoreError};
pub use fusion::{CandidateSet, FusionEngine, PredicateStage, ScoredId, ScoredResult, Stage};
pub use index::rank::RankStage;
pub use index::scalar::FilterStage;
pub use index::vector::VectorStage;
pub use index::{IndexQueryContext, IndexState, IndexStatus};
pub use item::{AuthContext, FieldMap, FieldRef, IdElement, Item, ItemId, RestrictedField};
pub use keyspace::{KeySpace, Subspace};
pub use kv::{KvEngine, KvTransaction, KvWatch, RangeOptions, ReadMode};
pub use plan::{CardinalityHints, CostModel, Plan, PlanNode};
pub use query::{Bound, Comparison, FieldPredicate, Filter, Query, SortDirection};
pub use retry::RetryConfig;
pub use schema::{EntityDescriptor, IndexDescriptor, IndexKind, Schema};
pub use stats::{CollectionStatistics, IndexStatistics};
pub use store::ItemStore;
pub use value::{FieldType, FieldValue};
pub use watch::{WatchEvent, WatchEventKind, WatchStream};

pub use quarry_pq as pq;
