//! Slab class management
//!
//! A slab class owns every slab carved at one chunk size and keeps an
//! intrusive LIFO free list threaded through the chunks' `next` links.
//! The most recently freed chunk is handed out first, which keeps hot
//! memory hot.

use super::footer::Footer;
use super::storage::Slab;
use super::slot::{Chunk, ChunkLoc};
use std::sync::atomic::AtomicU8;
use tracing::{debug, error, trace};

/// All slabs of one chunk size plus their free list
pub struct SlabClass {
    /// Position of this class in the arena
    pub(crate) index: u32,
    /// Size of chunks in this class (bytes)
    pub(crate) chunk_size: usize,
    pub(crate) slabs: Vec<Slab>,
    pub(crate) free_head: ChunkLoc,
    free_count: usize,
    in_use: usize,
    magic: u32,
}

impl SlabClass {
    /// Create an empty slab class whose slabs carry the arena's `magic`
    pub(crate) fn new(index: u32, chunk_size: usize, magic: u32) -> Self {
        Self {
            index,
            chunk_size,
            slabs: Vec::new(),
            free_head: ChunkLoc::EMPTY,
            free_count: 0,
            in_use: 0,
            magic,
        }
    }

    /// Index of this class in the arena
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Chunk size of this class
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Check if a request of `size` bytes fits a chunk of this class
    pub fn can_fit(&self, size: usize) -> bool {
        size <= self.chunk_size
    }

    /// Number of committed slabs
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Number of chunks on the free list
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Number of chunks handed out and not yet released
    pub fn in_use_count(&self) -> usize {
        self.in_use
    }

    /// Whether the free list is empty
    pub fn is_free_list_empty(&self) -> bool {
        self.free_head.is_empty()
    }

    /// Chunks carved across all slabs
    pub fn carved_chunks(&self) -> usize {
        self.slabs.iter().map(Slab::carved).sum()
    }

    /// Acquire a chunk for a new allocation
    ///
    /// Order of preference: free-list head, the next uncarved chunk of the
    /// newest slab, then the first chunk of a freshly committed slab.
    /// Returns `None` only if no further slab can be addressed.
    pub(crate) fn acquire_chunk(&mut self, slab_size: usize) -> Option<ChunkLoc> {
        let loc = self.next_chunk(slab_size)?;
        self.in_use += 1;
        Some(loc)
    }

    fn next_chunk(&mut self, slab_size: usize) -> Option<ChunkLoc> {
        if !self.free_head.is_empty() {
            return Some(self.pop_free_chunk());
        }

        if let Some(last) = self.slabs.len().checked_sub(1) {
            let slab_index = u32::try_from(last).ok()?;
            if let Some(loc) = self.slabs[last].carve(slab_index) {
                trace!(class = self.index, %loc, "Carved chunk");
                return Some(loc);
            }
        }

        // u32::MAX is reserved for the empty sentinel
        let slab_index = u32::try_from(self.slabs.len())
            .ok()
            .filter(|&i| i != ChunkLoc::EMPTY.slab)?;
        let footer = Footer::new(
            self.magic,
            self.index,
            slab_index,
            u32::try_from(self.chunk_size).ok()?,
        );
        let mut slab = Slab::new(self.chunk_size, slab_size, &footer);
        let loc = slab.carve(slab_index)?;
        debug!(
            class = self.index,
            chunk_size = self.chunk_size,
            slab = slab_index,
            chunks = slab.capacity(),
            bytes = slab.committed_bytes(),
            "Committed new slab"
        );
        self.slabs.push(slab);
        Some(loc)
    }

    /// Link an unreferenced chunk onto the free list
    ///
    /// # Panics
    /// If the location is empty or out of range, or the chunk still holds
    /// references. Freeing a live chunk would alias it with the next
    /// allocation.
    pub(crate) fn push_free_chunk(&mut self, loc: ChunkLoc) {
        let class = self.index;
        let head = self.free_head;
        let Some(chunk) = self.chunk_mut(loc) else {
            error!(class, %loc, "Free-list push of unknown chunk");
            panic!("push_free_chunk: unknown chunk {loc} in class {class}");
        };
        if chunk.refs != 0 {
            error!(class, %loc, refs = chunk.refs, "Free-list push of referenced chunk");
            panic!(
                "push_free_chunk: chunk {loc} in class {class} still has {} refs",
                chunk.refs
            );
        }
        chunk.next = head;
        self.free_head = loc;
        self.free_count += 1;
        self.in_use = self.in_use.saturating_sub(1);
        trace!(class, %loc, "Pushed free chunk");
    }

    /// Unlink the free-list head
    ///
    /// # Panics
    /// If the free list is empty, or the head chunk carries references
    /// (free-list corruption).
    pub(crate) fn pop_free_chunk(&mut self) -> ChunkLoc {
        let class = self.index;
        let loc = self.free_head;
        if loc.is_empty() {
            error!(class, "Free-list pop on empty list");
            panic!("pop_free_chunk: free list of class {class} is empty");
        }
        let Some(chunk) = self.chunk_mut(loc) else {
            error!(class, %loc, "Free-list head is dangling");
            panic!("pop_free_chunk: free-list head {loc} of class {class} is dangling");
        };
        if chunk.refs != 0 {
            error!(class, %loc, refs = chunk.refs, "Referenced chunk on free list");
            panic!(
                "pop_free_chunk: free chunk {loc} in class {class} has {} refs",
                chunk.refs
            );
        }
        let next = chunk.next;
        chunk.next = ChunkLoc::EMPTY;
        self.free_head = next;
        self.free_count -= 1;
        trace!(class, %loc, "Popped free chunk");
        loc
    }

    /// Resolve a location to its chunk
    ///
    /// Returns `None` for [`ChunkLoc::EMPTY`] and for locations that were
    /// never carved.
    pub fn chunk(&self, loc: ChunkLoc) -> Option<&Chunk> {
        if loc.is_empty() {
            return None;
        }
        self.slabs.get(loc.slab_index())?.chunk(loc.chunk_index())
    }

    pub(crate) fn chunk_mut(&mut self, loc: ChunkLoc) -> Option<&mut Chunk> {
        if loc.is_empty() {
            return None;
        }
        self.slabs
            .get_mut(loc.slab_index())?
            .chunk_mut(loc.chunk_index())
    }

    /// Payload storage backing a chunk
    ///
    /// Returns `None` for an absent chunk or one tagged with the empty
    /// sentinel.
    pub fn chunk_mem(&self, chunk: Option<&Chunk>) -> Option<&[AtomicU8]> {
        let loc = chunk?.self_loc;
        if loc.is_empty() {
            return None;
        }
        self.slabs.get(loc.slab_index())?.region(loc.chunk_index())
    }

    pub(crate) fn slab(&self, index: usize) -> Option<&Slab> {
        self.slabs.get(index)
    }
}
