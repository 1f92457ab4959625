//! Record envelope and blob chunking.
//!
//! Values at or under the inline limit store as `{version, flags, payload}` in the
//! primary slot. Larger values split into fixed-size chunks under
//! `B/<slotKeyBytes>/<chunkIndex>` and the slot holds a placeholder envelope
//! `{version, flags(bit0), total_length, chunk_count, checksum}`. Writes and the
//! matching chunk clears happen in one transaction, so the pair is atomic.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::error::StoreError;
use crate::keyspace::KeySpace;
use crate::kv::{KvTransaction, RangeOptions, ReadMode};

pub(crate) const ENVELOPE_VERSION: u8 = 1;
const FLAG_CHUNKED: u8 = 0b0000_0001;

/// Values above this store chunked (a buffer under the KV value-size limit).
pub(crate) const INLINE_LIMIT: usize = 90 * 1024;
pub(crate) const CHUNK_SIZE: usize = 80 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Envelope {
    Inline(Vec<u8>),
    Chunked { total_length: u64, chunk_count: u32, checksum: u64 },
}

pub(crate) fn checksum(payload: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(payload);
    hasher.finish()
}

impl Envelope {
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Envelope::Inline(payload) => {
                let mut out = Vec::with_capacity(2 + payload.len());
                out.push(ENVELOPE_VERSION);
                out.push(0);
                out.extend_from_slice(payload);
                out
            }
            Envelope::Chunked { total_length, chunk_count, checksum } => {
                let mut out = Vec::with_capacity(22);
                out.push(ENVELOPE_VERSION);
                out.push(FLAG_CHUNKED);
                out.extend_from_slice(&total_length.to_le_bytes());
                out.extend_from_slice(&chunk_count.to_le_bytes());
                out.extend_from_slice(&checksum.to_le_bytes());
                out
            }
        }
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < 2 {
            return Err(StoreError::CorruptEnvelope("short header"));
        }
        if bytes[0] != ENVELOPE_VERSION {
            return Err(StoreError::CorruptEnvelope("unknown envelope version"));
        }
        if bytes[1] & FLAG_CHUNKED == 0 {
            return Ok(Envelope::Inline(bytes[2..].to_vec()));
        }
        if bytes.len() != 22 {
            return Err(StoreError::CorruptEnvelope("malformed chunk placeholder"));
        }
        let u64_at = |o: usize| u64::from_le_bytes(bytes[o..o + 8].try_into().expect("8 bytes"));
        Ok(Envelope::Chunked {
            total_length: u64_at(2),
            chunk_count: u32::from_le_bytes(bytes[10..14].try_into().expect("4 bytes")),
            checksum: u64_at(14),
        })
    }
}

/// Write `payload` at `slot_key`, chunking when oversized. Stale chunks from a
/// previous (possibly larger) value are always cleared first.
pub(crate) fn write_blob(txn: &mut dyn KvTransaction, ks: &KeySpace, slot_key: &[u8], payload: &[u8]) {
    let (begin, end) = ks.blobs(slot_key).range();
    txn.clear_range(&begin, &end);

    if payload.len() <= INLINE_LIMIT {
        txn.set(slot_key, &Envelope::Inline(payload.to_vec()).encode());
        return;
    }

    let mut count = 0u32;
    for (i, chunk) in payload.chunks(CHUNK_SIZE).enumerate() {
        txn.set(&ks.blob_chunk_key(slot_key, i as u32), chunk);
        count += 1;
    }
    let placeholder =
        Envelope::Chunked { total_length: payload.len() as u64, chunk_count: count, checksum: checksum(payload) };
    txn.set(slot_key, &placeholder.encode());
}

/// Read the value at `slot_key`, reassembling chunks behind a placeholder.
pub(crate) async fn read_blob(
    txn: &mut dyn KvTransaction,
    ks: &KeySpace,
    slot_key: &[u8],
    mode: ReadMode,
) -> Result<Option<Vec<u8>>, StoreError> {
    let Some(envelope_bytes) = txn.get(slot_key, mode).await? else {
        return Ok(None);
    };
    match Envelope::decode(&envelope_bytes)? {
        Envelope::Inline(payload) => Ok(Some(payload)),
        Envelope::Chunked { total_length, chunk_count, checksum: expected } => {
            let (begin, end) = ks.blobs(slot_key).range();
            let opts = RangeOptions { mode, ..Default::default() };
            let chunks = txn.get_range(&begin, &end, opts).await?;
            if chunks.len() != chunk_count as usize {
                return Err(StoreError::CorruptEnvelope("chunk count mismatch"));
            }
            let mut payload = Vec::with_capacity(total_length as usize);
            for (_, chunk) in chunks {
                payload.extend_from_slice(&chunk);
            }
            if payload.len() as u64 != total_length {
                return Err(StoreError::CorruptEnvelope("chunk length mismatch"));
            }
            if checksum(&payload) != expected {
                return Err(StoreError::CorruptEnvelope("checksum mismatch"));
            }
            Ok(Some(payload))
        }
    }
}

/// Clear the slot and every chunk under it.
pub(crate) fn clear_blob(txn: &mut dyn KvTransaction, ks: &KeySpace, slot_key: &[u8]) {
    txn.clear(slot_key);
    let (begin, end) = ks.blobs(slot_key).range();
    txn.clear_range(&begin, &end);
}
