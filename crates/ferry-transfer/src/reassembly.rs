//! Receiver-side store of chunk payloads keyed by sequence number.
//!
//! Owned by a single receiver for the length of its session. Assembly
//! concatenates payloads in sequence order and refuses to paper over gaps.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::chunker::Chunk;
use crate::error::{Result, TransferError};

#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    chunks: BTreeMap<u64, Bytes>,
    total_bytes: u64,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk. Returns true if it was newly stored, false for an
    /// identical duplicate. A duplicate with different content is rejected.
    pub fn insert(&mut self, chunk: Chunk) -> Result<bool> {
        if let Some(existing) = self.chunks.get(&chunk.sequence) {
            if *existing != chunk.payload {
                return Err(TransferError::violation(format!(
                    "chunk {} received twice with different content",
                    chunk.sequence
                )));
            }
            return Ok(false);
        }
        self.total_bytes += chunk.payload.len() as u64;
        self.chunks.insert(chunk.sequence, chunk.payload);
        Ok(true)
    }

    #[inline]
    pub fn contains(&self, sequence: u64) -> bool {
        self.chunks.contains_key(&sequence)
    }

    /// Number of chunks stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Payload bytes stored so far.
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Sequence numbers in `[0, chunk_count)` not yet stored.
    pub fn missing(&self, chunk_count: u64) -> Vec<u64> {
        (0..chunk_count).filter(|seq| !self.contains(*seq)).collect()
    }

    /// Returns true if every sequence number in `[0, chunk_count)` is stored
    /// and nothing outside that range is.
    pub fn is_complete(&self, chunk_count: u64) -> bool {
        self.chunks.len() as u64 == chunk_count
            && self.chunks.keys().next_back().is_none_or(|&last| last.checked_add(1) == Some(chunk_count))
    }

    /// Concatenate payloads in sequence order `0..chunk_count`.
    pub fn assemble(self, chunk_count: u64) -> Result<Bytes> {
        if !self.is_complete(chunk_count) {
            let missing = self.missing(chunk_count);
            return Err(TransferError::violation(format!(
                "cannot reassemble {} chunks: holding {}, missing {:?}",
                chunk_count,
                self.chunks.len(),
                &missing[..missing.len().min(8)]
            )));
        }

        let mut out = BytesMut::with_capacity(self.total_bytes as usize);
        for payload in self.chunks.into_values() {
            out.extend_from_slice(&payload);
        }
        Ok(out.freeze())
    }
}
