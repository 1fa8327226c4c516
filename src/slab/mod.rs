//! Slab Arena
//!
//! Size-classed, reference-counted allocator for byte buffers. Requests
//! are grouped into classes whose chunk sizes grow geometrically; freed
//! chunks are reused last-in-first-out.
//!
//! # Architecture
//!
//! ```text
//! SlabArena
//!   ├─→ SlabClass(1B)  → Free: Chunk(0,3) → Chunk(0,1) → empty
//!   │     └─→ Slab 0: [c0][c1][c2][c3] ...
//!   ├─→ SlabClass(2B)  → Free: empty
//!   │     └─→ Slab 0: [c0][c1] ...
//!   └─→ SlabClass(4B)  (created on first request > 2B)
//!
//! Slab   = | c0 | c1 | ... | cN-1 | footer: magic, class, slab, chunk_size |
//! ```
//!
//! `add_ref` and `dec_ref` take the bare [`Buffer`]; the footer at the end
//! of its slab names the class and slab, and the buffer's offset within
//! the slab names the chunk.

pub mod allocator;
pub mod buffer;
pub mod footer;
pub mod size_class;
pub mod slot;
pub mod storage;

pub use allocator::{ArenaStats, SlabArena, SlabClassStats};
pub use buffer::Buffer;
pub use footer::{BufferError, FOOTER_LEN};
pub use size_class::SlabClass;
pub use slot::{Chunk, ChunkLoc};
pub use storage::Slab;
