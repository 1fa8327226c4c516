//! Chunk locations and per-chunk bookkeeping

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a chunk inside its slab class
///
/// The pair `(slab, chunk)` indexes into the class's slab list and then
/// into that slab's chunk table. [`ChunkLoc::EMPTY`] is the "no chunk"
/// sentinel used to terminate free lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkLoc {
    /// Slab index within the class
    pub slab: u32,
    /// Chunk index within the slab
    pub chunk: u32,
}

impl ChunkLoc {
    /// Sentinel meaning "no chunk"
    pub const EMPTY: ChunkLoc = ChunkLoc {
        slab: u32::MAX,
        chunk: u32::MAX,
    };

    /// Create a new chunk location
    pub fn new(slab: u32, chunk: u32) -> Self {
        Self { slab, chunk }
    }

    /// Whether this is the empty sentinel
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub(crate) fn slab_index(&self) -> usize {
        self.slab as usize
    }

    pub(crate) fn chunk_index(&self) -> usize {
        self.chunk as usize
    }
}

impl Default for ChunkLoc {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for ChunkLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Chunk(empty)")
        } else {
            write!(f, "Chunk(slab={}, chunk={})", self.slab, self.chunk)
        }
    }
}

/// One allocation unit
///
/// `refs == 0` means the chunk is free; `next` is only meaningful while the
/// chunk sits on its class's free list.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub(crate) refs: u32,
    pub(crate) self_loc: ChunkLoc,
    pub(crate) next: ChunkLoc,
}

impl Chunk {
    pub(crate) fn new(self_loc: ChunkLoc) -> Self {
        Self {
            refs: 0,
            self_loc,
            next: ChunkLoc::EMPTY,
        }
    }

    /// Live reference count
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Location of this chunk in its class
    pub fn loc(&self) -> ChunkLoc {
        self.self_loc
    }

    /// Whether the chunk is free (unreferenced)
    pub fn is_free(&self) -> bool {
        self.refs == 0
    }
}
