//! Slab memory blocks
//!
//! A slab commits all of its storage up front and hands out chunks front
//! to back. The payload block holds `slab_size / chunk_size` chunks packed
//! at `chunk_size` strides; one footer follows the block:
//!
//! ```text
//! | chunk 0 | chunk 1 | ... | chunk n-1 | footer |
//! ```

use super::footer::{Footer, FOOTER_LEN};
use super::slot::{Chunk, ChunkLoc};
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

/// One contiguous block of chunk storage
pub struct Slab {
    memory: Arc<[AtomicU8]>,
    chunks: Vec<Chunk>,
    capacity: usize,
    chunk_size: usize,
}

impl Slab {
    /// Commit a slab able to hold `slab_size / chunk_size` chunks and
    /// stamp its footer
    pub(crate) fn new(chunk_size: usize, slab_size: usize, footer: &Footer) -> Self {
        let capacity = slab_size / chunk_size;
        let payload = capacity * chunk_size;
        let memory: Arc<[AtomicU8]> = (0..payload + FOOTER_LEN)
            .map(|_| AtomicU8::new(0))
            .collect();
        footer.write_to(&memory[payload..]);

        Self {
            memory,
            chunks: Vec::with_capacity(capacity),
            capacity,
            chunk_size,
        }
    }

    /// Carve the next uncarved chunk, if any remain
    pub(crate) fn carve(&mut self, slab_index: u32) -> Option<ChunkLoc> {
        if self.chunks.len() >= self.capacity {
            return None;
        }
        let loc = ChunkLoc::new(slab_index, u32::try_from(self.chunks.len()).ok()?);
        self.chunks.push(Chunk::new(loc));
        Some(loc)
    }

    pub(crate) fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    /// Byte offset of a chunk within the slab's memory
    pub(crate) fn offset_of(&self, index: usize) -> usize {
        index * self.chunk_size
    }

    /// Chunk starting exactly at `offset`, if it has been carved
    pub(crate) fn chunk_index_at(&self, offset: usize) -> Option<usize> {
        if offset % self.chunk_size != 0 {
            return None;
        }
        let index = offset / self.chunk_size;
        (index < self.chunks.len()).then_some(index)
    }

    /// Payload storage of a carved chunk
    pub(crate) fn region(&self, index: usize) -> Option<&[AtomicU8]> {
        if index >= self.chunks.len() {
            return None;
        }
        let start = self.offset_of(index);
        self.memory.get(start..start + self.chunk_size)
    }

    pub(crate) fn memory(&self) -> &Arc<[AtomicU8]> {
        &self.memory
    }

    /// Bytes available to chunks, footer excluded
    pub fn payload_bytes(&self) -> usize {
        self.capacity * self.chunk_size
    }

    /// Chunks this slab can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks carved so far
    pub fn carved(&self) -> usize {
        self.chunks.len()
    }

    /// Whether every chunk has been carved
    pub fn is_full(&self) -> bool {
        self.chunks.len() >= self.capacity
    }

    /// Bytes committed for this slab
    pub fn committed_bytes(&self) -> usize {
        self.memory.len()
    }
}
