//! Fixed-size chunking of a source into sequentially numbered records.

use std::num::NonZeroUsize;

use bytes::Bytes;

use crate::error::{Result, TransferError};

/// A numbered slice of the source. Payloads share the source buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence: u64,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }
}

/// Splits byte sources into `chunk_size` pieces; only the last may be shorter.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: NonZeroUsize,
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Result<Self> {
        let chunk_size = NonZeroUsize::new(chunk_size)
            .ok_or_else(|| TransferError::Config("chunk size must be positive".into()))?;
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Number of chunks a source of `len` bytes splits into.
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size.get() as u64)
    }

    /// Lazily iterate the chunks of `source` in sequence order.
    pub fn chunks(&self, source: &Bytes) -> Chunks {
        Chunks {
            source: source.clone(),
            offset: 0,
            sequence: 0,
            chunk_size: self.chunk_size.get(),
        }
    }

    pub fn split(&self, source: &Bytes) -> Vec<Chunk> {
        self.chunks(source).collect()
    }
}

/// Iterator returned by [`Chunker::chunks`].
pub struct Chunks {
    source: Bytes,
    offset: usize,
    sequence: u64,
    chunk_size: usize,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.source.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.source.len());
        let chunk = Chunk {
            sequence: self.sequence,
            payload: self.source.slice(self.offset..end),
        };
        self.offset = end;
        self.sequence += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.source.len() - self.offset).div_ceil(self.chunk_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}
