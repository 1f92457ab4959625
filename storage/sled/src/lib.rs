//! Sled-backed implementation of the Quarry ordered-KV engine contract:
//! serializable optimistic transactions with commit versions, estimated range
//! sizes, and key watches.

mod engine;

pub use engine::SledKvEngine;
