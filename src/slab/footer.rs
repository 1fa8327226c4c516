//! Buffer footer codec
//!
//! Every slab ends in a fixed-length trailer, so every buffer carved
//! from it is followed (at the end of its slab's storage) by:
//!
//! ```text
//! | ... chunks ... | magic u32 | class u32 | slab u32 | chunk_size u32 |
//!                  └──────────────────── FOOTER_LEN ────────────────────┘
//! ```
//!
//! All fields are big-endian. The magic is unique per arena, so buffers
//! from one arena are rejected by another. A buffer's chunk index is its
//! distance from the slab start divided by `chunk_size`.

use bytes::{Buf, BufMut};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use thiserror::Error;

/// Bytes of arena bookkeeping trailing every buffer's slab
pub const FOOTER_LEN: usize = 16;

const FOOTER_MAGIC_BASE: u32 = 0x5AB0_C4A1;

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(0);

/// Draw a fresh, non-zero footer marker for a new arena
pub(crate) fn next_arena_magic() -> u32 {
    let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
    match FOOTER_MAGIC_BASE ^ id.wrapping_mul(0x9E37_79B9) {
        0 => FOOTER_MAGIC_BASE,
        magic => magic,
    }
}

/// Reasons a buffer cannot be tied back to a chunk of this arena
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer is missing")]
    Missing,

    #[error("buffer capacity {capacity} is smaller than the footer ({footer} bytes)")]
    TooShort { capacity: usize, footer: usize },

    #[error("buffer footer marker {found:#010x} does not belong to this arena")]
    BadMagic { found: u32 },

    #[error("buffer footer points outside the arena: class={class}, slab={slab}")]
    OutOfRange { class: u32, slab: u32 },

    #[error("buffer does not view a chunk of class={class}, slab={slab}")]
    Foreign { class: u32, slab: u32 },
}

/// Decoded footer contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footer {
    pub magic: u32,
    pub class: u32,
    pub slab: u32,
    pub chunk_size: u32,
}

impl Footer {
    pub fn new(magic: u32, class: u32, slab: u32, chunk_size: u32) -> Self {
        Self {
            magic,
            class,
            slab,
            chunk_size,
        }
    }

    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut out = [0u8; FOOTER_LEN];
        let mut dst = &mut out[..];
        dst.put_u32(self.magic);
        dst.put_u32(self.class);
        dst.put_u32(self.slab);
        dst.put_u32(self.chunk_size);
        out
    }

    pub fn decode(mut src: &[u8]) -> Option<Self> {
        if src.len() != FOOTER_LEN {
            return None;
        }
        let magic = src.get_u32();
        let class = src.get_u32();
        let slab = src.get_u32();
        let chunk_size = src.get_u32();
        Some(Self::new(magic, class, slab, chunk_size))
    }

    /// Store the footer into slab cells
    pub fn write_to(&self, cells: &[AtomicU8]) {
        debug_assert_eq!(cells.len(), FOOTER_LEN);
        for (cell, byte) in cells.iter().zip(self.encode()) {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    /// Load a footer from slab cells
    pub fn read_from(cells: &[AtomicU8]) -> Option<Self> {
        if cells.len() != FOOTER_LEN {
            return None;
        }
        let mut raw = [0u8; FOOTER_LEN];
        for (byte, cell) in raw.iter_mut().zip(cells) {
            *byte = cell.load(Ordering::Relaxed);
        }
        Self::decode(&raw)
    }
}
