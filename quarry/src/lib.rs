//! Quarry: typed object persistence and multi-modal indexing over an ordered
//! key-value store. This crate re-exports the public surface of `quarry-core`
//! (including the PQ codec as `quarry::pq`); storage engines such as
//! `quarry-storage-sled` are separate crates.

pub use quarry_core::*;
