//! Chunk planning: partitioning a byte range into fixed-size segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::ops::Range;

/// A contiguous byte range of a file, the unit of transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the upload (0-indexed).
    pub index: u64,
    /// Byte offset of the first byte.
    pub offset: u64,
    /// Length in bytes.
    pub len: u64,
}

impl Chunk {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Byte range covered by this chunk.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk#{}[{}..{})", self.index, self.offset, self.end())
    }
}

/// The ordered chunk layout of a file of `total_size` bytes.
///
/// Chunk `i` covers `[i * chunk_size, min(total_size, (i + 1) * chunk_size))`.
/// A zero-length file has no chunks at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: NonZeroU64,
}

impl ChunkPlan {
    /// Create a plan. The chunk size is non-zero by construction.
    pub fn new(total_size: u64, chunk_size: NonZeroU64) -> Self {
        Self {
            total_size,
            chunk_size,
        }
    }

    /// Create a plan from a raw chunk size, rejecting zero.
    pub fn try_new(total_size: u64, chunk_size: u64) -> crate::Result<Self> {
        let chunk_size =
            NonZeroU64::new(chunk_size).ok_or(crate::Error::InvalidChunkSize(chunk_size))?;
        Ok(Self::new(total_size, chunk_size))
    }

    /// Total number of bytes covered.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Size of every chunk but the last.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.get()
    }

    /// Number of chunks: `ceil(total_size / chunk_size)`.
    pub fn chunk_count(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size.get())
    }

    /// Whether there is nothing to upload.
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Descriptor for chunk `index`, or `None` when out of range.
    pub fn chunk(&self, index: u64) -> Option<Chunk> {
        if index >= self.chunk_count() {
            return None;
        }
        let offset = index * self.chunk_size.get();
        let len = self.chunk_size.get().min(self.total_size - offset);
        Some(Chunk { index, offset, len })
    }

    /// Iterate over all chunks in index order.
    pub fn iter(&self) -> impl Iterator<Item = Chunk> + use<> {
        let plan = *self;
        (0..plan.chunk_count()).filter_map(move |i| plan.chunk(i))
    }

    /// Collect all chunks in index order.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.iter().collect()
    }
}

/// Split `size` bytes into chunks of `chunk_size`.
pub fn split(size: u64, chunk_size: NonZeroU64) -> Vec<Chunk> {
    ChunkPlan::new(size, chunk_size).chunks()
}
