//! Buffers handed out by the arena
//!
//! A [`Buffer`] is a view of `len` bytes inside a slab. The slab's
//! arena-owned footer sits at the end of the slab storage and is never
//! reachable through the buffer's byte accessors.

use super::footer::FOOTER_LEN;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// View into arena-owned slab memory
///
/// Cloning a `Buffer` copies the view only; it does not add a reference.
/// Call [`SlabArena::add_ref`](super::SlabArena::add_ref) for every
/// additional owner and [`SlabArena::dec_ref`](super::SlabArena::dec_ref)
/// once per owner when done. After the last `dec_ref` the chunk may be
/// handed to another caller, and this view then observes (and can
/// clobber) that caller's bytes.
#[derive(Clone)]
pub struct Buffer {
    memory: Arc<[AtomicU8]>,
    offset: usize,
    len: usize,
}

impl Buffer {
    pub(crate) fn new(memory: Arc<[AtomicU8]>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len + FOOTER_LEN <= memory.len());
        Self {
            memory,
            offset,
            len,
        }
    }

    /// Logical length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing capacity, always `len() + FOOTER_LEN`
    pub fn capacity(&self) -> usize {
        self.len + FOOTER_LEN
    }

    /// Read one byte
    pub fn get(&self, index: usize) -> Option<u8> {
        self.payload()
            .get(index)
            .map(|cell| cell.load(Ordering::Relaxed))
    }

    /// Write one byte
    ///
    /// # Panics
    /// If `index >= len()`.
    pub fn set(&self, index: usize, value: u8) {
        self.payload()[index].store(value, Ordering::Relaxed);
    }

    /// Copy `src` into the buffer starting at `offset`
    ///
    /// # Panics
    /// If `offset + src.len() > len()`.
    pub fn write_at(&self, offset: usize, src: &[u8]) {
        let end = offset
            .checked_add(src.len())
            .filter(|&end| end <= self.len)
            .unwrap_or_else(|| {
                panic!(
                    "write of {} bytes at offset {} overruns buffer of length {}",
                    src.len(),
                    offset,
                    self.len
                )
            });
        for (cell, &byte) in self.payload()[offset..end].iter().zip(src) {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    /// Overwrite the whole buffer with `src`
    ///
    /// # Panics
    /// If `src.len() != len()`.
    pub fn copy_from_slice(&self, src: &[u8]) {
        assert_eq!(
            src.len(),
            self.len,
            "source length {} does not match buffer length {}",
            src.len(),
            self.len
        );
        self.write_at(0, src);
    }

    /// Set every byte to `value`
    pub fn fill(&self, value: u8) {
        for cell in self.payload() {
            cell.store(value, Ordering::Relaxed);
        }
    }

    /// Copy the logical bytes out
    pub fn to_vec(&self) -> Vec<u8> {
        self.payload()
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    fn payload(&self) -> &[AtomicU8] {
        &self.memory[self.offset..self.offset + self.len]
    }

    /// Slab storage from the buffer's first byte through the slab footer,
    /// as the arena validates it
    pub(crate) fn raw(&self) -> &[AtomicU8] {
        &self.memory[self.offset..]
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("offset", &self.offset)
            .finish()
    }
}
