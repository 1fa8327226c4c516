//! Slab arena implementation

use super::buffer::Buffer;
use super::footer::{next_arena_magic, BufferError, Footer, FOOTER_LEN};
use super::size_class::SlabClass;
use super::slot::{Chunk, ChunkLoc};
use crate::config::ArenaConfig;
use crate::error::Result;
use serde::Serialize;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Owning class and chunk of a validated buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Container {
    pub class: usize,
    pub loc: ChunkLoc,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    allocs: u64,
    alloc_refusals: u64,
    add_refs: u64,
    dec_refs: u64,
    frees: u64,
}

/// Size-classed, reference-counted arena for byte buffers
///
/// Requests are served from the smallest slab class whose chunk size fits
/// them; classes are appended lazily with chunk sizes growing by
/// `growth_factor`. Released chunks are reused last-in-first-out.
///
/// The arena performs no internal synchronization. Every mutating call
/// takes `&mut self`; callers sharing an arena between threads must wrap
/// it in their own lock.
pub struct SlabArena {
    start_chunk_size: usize,
    slab_size: usize,
    growth_factor: f64,
    magic: u32,
    classes: Vec<SlabClass>,
    counters: Counters,
}

impl SlabArena {
    /// Create a new arena with a single slab class
    ///
    /// # Arguments
    /// * `start_chunk_size` - Chunk size of the first class
    /// * `slab_size` - Bytes per slab, and the largest servable request
    /// * `growth_factor` - Ratio between consecutive chunk sizes (> 1)
    pub fn new(start_chunk_size: usize, slab_size: usize, growth_factor: f64) -> Result<Self> {
        Self::with_config(&ArenaConfig::new(
            start_chunk_size,
            slab_size,
            growth_factor,
        ))
    }

    /// Create a new arena from a configuration
    pub fn with_config(config: &ArenaConfig) -> Result<Self> {
        config.validate()?;

        let magic = next_arena_magic();
        info!(
            start_chunk_size = config.start_chunk_size,
            slab_size = config.slab_size,
            growth_factor = config.growth_factor,
            "Initializing slab arena"
        );

        Ok(Self {
            start_chunk_size: config.start_chunk_size,
            slab_size: config.slab_size,
            growth_factor: config.growth_factor,
            magic,
            classes: vec![SlabClass::new(0, config.start_chunk_size, magic)],
            counters: Counters::default(),
        })
    }

    /// Allocate a buffer of `size` bytes with a reference count of one
    ///
    /// Returns `None` when no slab class, existing or growable within
    /// `slab_size`, can hold the request.
    pub fn alloc(&mut self, size: usize) -> Option<Buffer> {
        if size > self.slab_size {
            debug!(size, slab_size = self.slab_size, "Refusing oversized allocation");
            self.counters.alloc_refusals += 1;
            return None;
        }

        let Some(class_index) = self.find_class_index(size) else {
            debug!(size, classes = self.classes.len(), "No slab class can hold allocation");
            self.counters.alloc_refusals += 1;
            return None;
        };

        let slab_size = self.slab_size;
        let class = &mut self.classes[class_index];
        let Some(loc) = class.acquire_chunk(slab_size) else {
            debug!(size, class = class_index, "Slab class cannot address another slab");
            self.counters.alloc_refusals += 1;
            return None;
        };

        let chunk = class.chunk_mut(loc)?;
        chunk.refs = 1;
        chunk.next = ChunkLoc::EMPTY;

        let slab = class.slab(loc.slab_index())?;
        let buf = Buffer::new(
            Arc::clone(slab.memory()),
            slab.offset_of(loc.chunk_index()),
            size,
        );

        self.counters.allocs += 1;
        trace!(size, class = class_index, %loc, "Allocated buffer");
        Some(buf)
    }

    /// Register one more owner of `buf`
    ///
    /// # Panics
    /// If `buf` does not belong to this arena or its chunk was already
    /// released.
    pub fn add_ref(&mut self, buf: &Buffer) {
        let container = self.buf_container(Some(buf.raw()));
        let chunk = self.container_chunk_mut(container);
        if chunk.refs == 0 {
            error!(class = container.class, loc = %container.loc, "add_ref on released buffer");
            panic!(
                "add_ref: buffer in class {} at {} was already released",
                container.class, container.loc
            );
        }
        chunk.refs = chunk.refs.checked_add(1).unwrap_or_else(|| {
            panic!(
                "add_ref: reference count overflow in class {} at {}",
                container.class, container.loc
            )
        });
        let refs = chunk.refs;
        self.counters.add_refs += 1;
        trace!(class = container.class, loc = %container.loc, refs, "Added reference");
    }

    /// Release one owner of `buf`
    ///
    /// When the last reference goes away the chunk returns to its class's
    /// free list; its bytes are left as they are.
    ///
    /// # Panics
    /// If `buf` does not belong to this arena or was already fully
    /// released.
    pub fn dec_ref(&mut self, buf: &Buffer) {
        let container = self.buf_container(Some(buf.raw()));
        let chunk = self.container_chunk_mut(container);
        if chunk.refs == 0 {
            error!(class = container.class, loc = %container.loc, "dec_ref on released buffer");
            panic!(
                "dec_ref: buffer in class {} at {} was already released",
                container.class, container.loc
            );
        }
        chunk.refs -= 1;
        let refs = chunk.refs;
        self.counters.dec_refs += 1;
        trace!(class = container.class, loc = %container.loc, refs, "Dropped reference");

        if refs == 0 {
            self.classes[container.class].push_free_chunk(container.loc);
            self.counters.frees += 1;
        }
    }

    /// Current reference count of `buf`'s chunk
    ///
    /// # Panics
    /// If `buf` does not belong to this arena.
    pub fn ref_count(&self, buf: &Buffer) -> u32 {
        let container = self.buf_container(Some(buf.raw()));
        self.classes[container.class]
            .chunk(container.loc)
            .map(Chunk::refs)
            .unwrap_or_default()
    }

    /// Whether `buf` was issued by this arena
    ///
    /// Non-panicking form of the validation `add_ref` and `dec_ref`
    /// perform. Says nothing about whether the buffer is still live.
    pub fn owns(&self, buf: &Buffer) -> bool {
        self.try_container(Some(buf.raw())).is_ok()
    }

    /// Resolve raw buffer storage (the buffer's slab storage from its first
    /// byte through the slab footer) to its chunk
    ///
    /// # Panics
    /// If the storage is absent, too short, carries a foreign or corrupt
    /// footer, or does not start on a carved chunk of the slab its footer
    /// names.
    pub(crate) fn buf_container(&self, raw: Option<&[AtomicU8]>) -> Container {
        match self.try_container(raw) {
            Ok(container) => container,
            Err(e) => {
                error!(error = %e, "Invalid buffer presented to slab arena");
                panic!("buf_container: {e}");
            }
        }
    }

    fn try_container(
        &self,
        raw: Option<&[AtomicU8]>,
    ) -> std::result::Result<Container, BufferError> {
        let raw = raw.ok_or(BufferError::Missing)?;
        if raw.len() < FOOTER_LEN {
            return Err(BufferError::TooShort {
                capacity: raw.len(),
                footer: FOOTER_LEN,
            });
        }

        let footer = Footer::read_from(&raw[raw.len() - FOOTER_LEN..]).ok_or(
            BufferError::TooShort {
                capacity: raw.len(),
                footer: FOOTER_LEN,
            },
        )?;
        if footer.magic != self.magic {
            return Err(BufferError::BadMagic {
                found: footer.magic,
            });
        }

        let out_of_range = BufferError::OutOfRange {
            class: footer.class,
            slab: footer.slab,
        };
        let class_index = footer.class as usize;
        let class = self.classes.get(class_index).ok_or(out_of_range.clone())?;
        if footer.chunk_size as usize != class.chunk_size {
            return Err(out_of_range);
        }
        let slab = class.slab(footer.slab as usize).ok_or(out_of_range)?;

        // The view must be a suffix of the slab's storage starting on a chunk
        let foreign = BufferError::Foreign {
            class: footer.class,
            slab: footer.slab,
        };
        let memory = slab.memory();
        let offset = memory.len().checked_sub(raw.len()).ok_or(foreign.clone())?;
        if !std::ptr::eq(memory[offset..].as_ptr(), raw.as_ptr()) {
            return Err(foreign);
        }
        let chunk = slab.chunk_index_at(offset).ok_or(foreign.clone())?;
        let chunk = u32::try_from(chunk).map_err(|_| foreign)?;

        Ok(Container {
            class: class_index,
            loc: ChunkLoc::new(footer.slab, chunk),
        })
    }

    fn container_chunk_mut(&mut self, container: Container) -> &mut Chunk {
        self.classes[container.class]
            .chunk_mut(container.loc)
            .unwrap_or_else(|| {
                panic!(
                    "chunk {} vanished from class {}",
                    container.loc, container.class
                )
            })
    }

    /// Index of the smallest class fitting `size`, growing the class list
    /// on demand
    fn find_class_index(&mut self, size: usize) -> Option<usize> {
        if let Some(index) = self.classes.iter().position(|sc| sc.can_fit(size)) {
            return Some(index);
        }

        loop {
            let last = self.classes.last()?.chunk_size;
            let next = (last as f64 * self.growth_factor).ceil();
            if !next.is_finite() || next > self.slab_size as f64 {
                return None;
            }
            // ceil(last * g) > last for g > 1; the max() guards float rounding
            let next = (next as usize).max(last + 1);
            let index = u32::try_from(self.classes.len()).ok()?;

            self.classes.push(SlabClass::new(index, next, self.magic));
            debug!(class = index, chunk_size = next, "Added slab class");

            if next >= size {
                return Some(index as usize);
            }
        }
    }

    /// Number of slab classes created so far
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Slab class by index
    pub fn class(&self, index: usize) -> Option<&SlabClass> {
        self.classes.get(index)
    }

    /// Chunk size of the first class
    pub fn start_chunk_size(&self) -> usize {
        self.start_chunk_size
    }

    /// Bytes per slab
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Ratio between consecutive chunk sizes
    pub fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    /// Get statistics about the arena
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            allocs: self.counters.allocs,
            alloc_refusals: self.counters.alloc_refusals,
            add_refs: self.counters.add_refs,
            dec_refs: self.counters.dec_refs,
            frees: self.counters.frees,
            ..ArenaStats::default()
        };

        for sc in &self.classes {
            let class_stats = SlabClassStats {
                index: sc.index as usize,
                chunk_size: sc.chunk_size,
                slabs: sc.slab_count(),
                chunks_per_slab: self.slab_size / sc.chunk_size,
                carved_chunks: sc.carved_chunks(),
                free_chunks: sc.free_count(),
                in_use_chunks: sc.in_use_count(),
            };
            stats.total_slabs += class_stats.slabs;
            stats.total_in_use_chunks += class_stats.in_use_chunks;
            stats.total_committed_bytes += sc
                .slabs
                .iter()
                .map(|s| s.committed_bytes())
                .sum::<usize>();
            stats.classes.push(class_stats);
        }

        stats
    }
}

/// Statistics for the slab arena
#[derive(Debug, Default, Clone, Serialize)]
pub struct ArenaStats {
    pub classes: Vec<SlabClassStats>,
    pub total_slabs: usize,
    pub total_in_use_chunks: usize,
    pub total_committed_bytes: usize,
    pub allocs: u64,
    pub alloc_refusals: u64,
    pub add_refs: u64,
    pub dec_refs: u64,
    pub frees: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SlabClassStats {
    pub index: usize,
    pub chunk_size: usize,
    pub slabs: usize,
    pub chunks_per_slab: usize,
    pub carved_chunks: usize,
    pub free_chunks: usize,
    pub in_use_chunks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn arena(start: usize, slab: usize, growth: f64) -> SlabArena {
        SlabArena::new(start, slab, growth).unwrap()
    }

    fn cells(len: usize) -> Vec<AtomicU8> {
        (0..len).map(|_| AtomicU8::new(0)).collect()
    }

    #[test]
    fn test_basics() {
        let mut s = arena(1, 1024, 2.0);

        let a = s.alloc(1).expect("alloc should work");
        assert_eq!(a.len(), 1);
        assert_eq!(a.capacity(), 1 + FOOTER_LEN);
        a.set(0, 66);
        s.dec_ref(&a);

        let b = s.alloc(1).expect("alloc should work");
        assert_eq!(b.len(), 1);
        assert_eq!(b.capacity(), 1 + FOOTER_LEN);
        assert_eq!(b.get(0), Some(66), "alloc should return last freed buf");

        s.add_ref(&b);
        s.dec_ref(&b);
        s.dec_ref(&b);
        let c = s.alloc(1).expect("alloc should work");
        assert_eq!(c.get(0), Some(66), "alloc should return last freed buf");
    }

    #[test]
    fn test_slab_class_growth() {
        let mut s = arena(1, 8, 2.0);
        assert_eq!(s.num_classes(), 1);

        let expected = [(1, 1), (1, 1), (2, 2), (1, 2), (2, 2), (3, 3), (4, 3), (5, 4), (8, 4)];
        for (size, classes) in expected {
            assert!(s.alloc(size).is_some(), "alloc({}) should work", size);
            assert_eq!(s.num_classes(), classes, "after alloc({})", size);
        }

        let sizes: Vec<usize> = (0..s.num_classes())
            .map(|i| s.class(i).unwrap().chunk_size())
            .collect();
        assert_eq!(sizes, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_fractional_growth_rounds_up() {
        let mut s = arena(1, 64, 1.5);
        assert!(s.alloc(5).is_some());

        let sizes: Vec<usize> = (0..s.num_classes())
            .map(|i| s.class(i).unwrap().chunk_size())
            .collect();
        // 1, ceil(1.5), ceil(3.0), ceil(4.5)
        assert_eq!(sizes, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_growth_stops_at_slab_size() {
        // 3, 6, 12 > 10: the 12-byte class is never created
        let mut s = arena(3, 10, 2.0);
        assert!(s.alloc(7).is_none());
        assert_eq!(s.num_classes(), 2);
        assert_eq!(s.stats().alloc_refusals, 1);

        assert!(s.alloc(6).is_some());
        assert_eq!(s.num_classes(), 2);
    }

    #[test]
    fn test_dec_ref_cycles_reuse_classes() {
        let mut s = arena(1, 8, 2.0);
        for _ in 0..100 {
            let bufs: Vec<Buffer> = (0..128).map(|i| s.alloc(i % 8).unwrap()).collect();
            for buf in &bufs {
                s.dec_ref(buf);
            }
        }
        assert_eq!(s.num_classes(), 4);

        let stats = s.stats();
        assert_eq!(stats.total_in_use_chunks, 0);
        assert_eq!(stats.allocs, 12_800);
        assert_eq!(stats.frees, 12_800);
    }

    #[test]
    fn test_add_ref() {
        let mut s = arena(1, 1, 2.0);
        assert!(s.class(0).unwrap().is_free_list_empty());

        let a = s.alloc(1).unwrap();
        a.set(0, 123);
        assert!(s.class(0).unwrap().is_free_list_empty());

        s.add_ref(&a);
        assert_eq!(s.ref_count(&a), 2);
        assert!(s.class(0).unwrap().is_free_list_empty());

        s.dec_ref(&a);
        assert!(s.class(0).unwrap().is_free_list_empty());

        s.dec_ref(&a);
        assert_eq!(s.ref_count(&a), 0);
        assert!(!s.class(0).unwrap().is_free_list_empty());

        let b = s.alloc(1).unwrap();
        assert_eq!(b.get(0), Some(123), "chunk should be reused");
    }

    #[test]
    fn test_large_alloc() {
        let mut s = arena(1, 1, 2.0);
        assert!(s.alloc(2).is_none());
        assert_eq!(s.num_classes(), 1);
    }

    #[test]
    fn test_zero_size_alloc() {
        let mut s = arena(4, 64, 2.0);
        let a = s.alloc(0).unwrap();
        assert!(a.is_empty());
        assert_eq!(a.capacity(), FOOTER_LEN);
        assert_eq!(s.ref_count(&a), 1);
        s.dec_ref(&a);
    }

    #[test]
    fn test_full_chunk_keeps_footer_separate() {
        let mut s = arena(4, 8, 2.0);
        let a = s.alloc(4).unwrap();
        let b = s.alloc(4).unwrap();
        a.fill(0xaa);
        b.fill(0xbb);
        s.add_ref(&a);
        s.add_ref(&b);
        assert_eq!(s.ref_count(&a), 2);
        assert_eq!(s.ref_count(&b), 2);
        assert_eq!(a.to_vec(), vec![0xaa; 4]);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            SlabArena::new(0, 1024, 2.0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            SlabArena::new(1, 0, 2.0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            SlabArena::new(1, 1024, 1.0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_owns() {
        let mut s = arena(1, 64, 2.0);
        let mut other = arena(1, 64, 2.0);
        let a = s.alloc(3).unwrap();
        let b = other.alloc(3).unwrap();

        assert!(s.owns(&a));
        assert!(!s.owns(&b));
        assert!(other.owns(&b));
        assert!(!other.owns(&a));
    }

    #[test]
    fn test_stats() {
        let mut s = arena(1, 4, 2.0);
        let a = s.alloc(1).unwrap();
        let _b = s.alloc(1).unwrap();
        let _c = s.alloc(3).unwrap();
        s.dec_ref(&a);

        let stats = s.stats();
        assert_eq!(stats.classes.len(), 3);
        assert_eq!(stats.total_slabs, 2);
        assert_eq!(stats.total_in_use_chunks, 2);
        assert_eq!(stats.allocs, 3);
        assert_eq!(stats.dec_refs, 1);
        assert_eq!(stats.frees, 1);

        let first = stats.classes[0];
        assert_eq!(first.chunk_size, 1);
        assert_eq!(first.chunks_per_slab, 4);
        assert_eq!(first.carved_chunks, 2);
        assert_eq!(first.free_chunks, 1);
        assert_eq!(first.in_use_chunks, 1);
        assert_eq!(stats.classes[1].slabs, 0);
        assert_eq!(
            stats.total_committed_bytes,
            (4 + FOOTER_LEN) + (4 + FOOTER_LEN)
        );
    }

    #[test]
    fn test_one_byte_class_commits_slab_size() {
        let mut s = arena(1, 1 << 20, 2.0);
        let a = s.alloc(1).unwrap();

        let stats = s.stats();
        assert_eq!(stats.total_slabs, 1);
        assert_eq!(stats.classes[0].chunks_per_slab, 1 << 20);
        assert_eq!(stats.total_committed_bytes, (1 << 20) + FOOTER_LEN);
        assert_eq!(s.class(0).unwrap().slab_count(), 1);

        // Filling the slab commits nothing more
        let bufs: Vec<Buffer> = (1..1 << 20).map(|_| s.alloc(1).unwrap()).collect();
        assert_eq!(s.stats().total_committed_bytes, (1 << 20) + FOOTER_LEN);
        assert_eq!(s.stats().total_in_use_chunks, 1 << 20);
        assert_eq!(s.ref_count(&a), 1);
        assert_eq!(s.ref_count(&bufs[bufs.len() - 1]), 1);
    }

    #[test]
    fn test_in_use_chunks_follow_releases() {
        let mut s = arena(2, 8, 2.0);
        let a = s.alloc(2).unwrap();
        let b = s.alloc(2).unwrap();
        s.add_ref(&b);
        assert_eq!(s.stats().total_in_use_chunks, 2);

        s.dec_ref(&b);
        assert_eq!(s.stats().total_in_use_chunks, 2);
        s.dec_ref(&b);
        s.dec_ref(&a);
        assert_eq!(s.stats().total_in_use_chunks, 0);

        let _c = s.alloc(1).unwrap();
        assert_eq!(s.stats().classes[0].in_use_chunks, 1);
    }

    #[test]
    #[should_panic(expected = "already released")]
    fn test_add_ref_on_already_released_buf() {
        let mut s = arena(1, 1, 2.0);
        let a = s.alloc(1).unwrap();
        s.dec_ref(&a);
        s.add_ref(&a);
    }

    #[test]
    #[should_panic(expected = "already released")]
    fn test_dec_ref_on_already_released_buf() {
        let mut s = arena(1, 1, 2.0);
        let a = s.alloc(1).unwrap();
        s.dec_ref(&a);
        s.dec_ref(&a);
    }

    #[test]
    #[should_panic(expected = "does not belong to this arena")]
    fn test_dec_ref_on_foreign_buf() {
        let mut s = arena(1, 64, 2.0);
        let mut other = arena(1, 64, 2.0);
        let b = other.alloc(1).unwrap();
        s.dec_ref(&b);
    }

    #[test]
    #[should_panic(expected = "buffer is missing")]
    fn test_buf_container_on_nil_buf() {
        let s = arena(1, 1024, 2.0);
        s.buf_container(None);
    }

    #[test]
    #[should_panic(expected = "smaller than the footer")]
    fn test_buf_container_on_small_buf() {
        let s = arena(1, 1024, 2.0);
        s.buf_container(Some(&cells(1)));
    }

    #[test]
    #[should_panic(expected = "does not belong to this arena")]
    fn test_buf_container_on_non_magic_buf() {
        let s = arena(1, 1024, 2.0);
        s.buf_container(Some(&cells(1 + FOOTER_LEN)));
    }

    #[test]
    #[should_panic(expected = "does not view a chunk")]
    fn test_buf_container_on_forged_footer() {
        let mut s = arena(1, 1024, 2.0);
        let a = s.alloc(1).unwrap();

        // Same footer bytes, different storage
        let raw = a.raw();
        let forged = cells(1 + FOOTER_LEN);
        let footer = Footer::read_from(&raw[raw.len() - FOOTER_LEN..]).unwrap();
        footer.write_to(&forged[1..]);
        s.buf_container(Some(&forged));
    }

    #[test]
    #[should_panic(expected = "points outside the arena")]
    fn test_buf_container_on_out_of_range_footer() {
        let mut s = arena(1, 1024, 2.0);
        let a = s.alloc(1).unwrap();

        let raw = a.raw();
        let forged = cells(1 + FOOTER_LEN);
        let footer = Footer::read_from(&raw[raw.len() - FOOTER_LEN..]).unwrap();
        Footer::new(footer.magic, 9, footer.slab, footer.chunk_size).write_to(&forged[1..]);
        s.buf_container(Some(&forged));
    }

    #[test]
    #[should_panic(expected = "does not view a chunk")]
    fn test_buf_container_on_misaligned_view() {
        let mut s = arena(2, 16, 2.0);
        let _a = s.alloc(2).unwrap();

        let memory = s.class(0).unwrap().slab(0).unwrap().memory();
        s.buf_container(Some(&memory[1..]));
    }

    #[test]
    #[should_panic(expected = "does not view a chunk")]
    fn test_buf_container_on_uncarved_chunk() {
        let mut s = arena(2, 16, 2.0);
        let _a = s.alloc(2).unwrap();

        // Chunk 3 lies inside the slab but was never handed out
        let memory = s.class(0).unwrap().slab(0).unwrap().memory();
        s.buf_container(Some(&memory[6..]));
    }
}
