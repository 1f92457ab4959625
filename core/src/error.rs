use thiserror::Error;

use crate::item::ItemId;
use crate::value::tuple::TupleError;

/// Errors surfaced by the ordered-KV engine contract.
///
/// `Unavailable` and `Conflict` are the transient classes: store operations retry
/// them internally with backoff and only surface them once the retry budget is
/// exhausted. Everything else is fatal to the call.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("store unavailable: {0}")]
    Unavailable(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("transaction conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl KvError {
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self { KvError::Unavailable(Box::new(err)) }

    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self { KvError::Backend(Box::new(err)) }

    pub fn is_retryable(&self) -> bool { matches!(self, KvError::Unavailable(_) | KvError::Conflict) }
}

/// Error type for store, index, and fusion operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Insert hit an existing primary key.
    #[error("duplicate key: {0}")]
    DuplicateKey(ItemId),

    /// Point lookup found nothing.
    #[error("item not found: {0}")]
    NotFound(ItemId),

    /// Schema has no descriptor for the requested type.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Stored payload does not match the current schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("tuple encoding: {0}")]
    Tuple(#[from] TupleError),

    #[error("vector codec: {0}")]
    Pq(#[from] quarry_pq::PqError),

    /// Range bounds of incompatible type.
    #[error("range bounds are not comparable: {0}")]
    RangeIncomparable(String),

    #[error("read of restricted field '{0}' denied")]
    SecurityReadDenied(String),

    #[error("write of restricted field '{0}' denied")]
    SecurityWriteDenied(String),

    /// The fusion engine rejected the stage list before running it.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Envelope or blob-chunk bytes are inconsistent.
    #[error("corrupt record envelope: {0}")]
    CorruptEnvelope(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl StoreError {
    /// Whether a fresh transaction attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Kv(kv) => kv.is_retryable(),
            _ => false,
        }
    }
}
