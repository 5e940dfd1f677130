//! # The block manager
//!
//! [`Heap`] ties the pieces together: it owns the segregated free-list
//! table, the arena registry and the memory source, and implements the
//! allocation and deallocation engines on top of them.
//!
//! Allocation rounds the request to a total block size, then first-fit
//! searches the size classes upward from the request's own class. A hit
//! either takes the whole block (when the residue would be too small to
//! stand alone) or splits the allocated block off the *tail*: the head stays
//! where it is, usually on the list it already occupies, and the allocated
//! bytes end up adjacent to any later arena growth, which helps sequential
//! free patterns coalesce. When every class is exhausted the heap grows by
//! one arena and the search restarts.
//!
//! Deallocation is O(1): the boundary tags locate both memory neighbors, and
//! the freed block fuses with whichever of them is free. Fenceposts are
//! never free, so fusion stops at arena edges by itself.

use crate::arena::{ChunkRegistry, carve_chunk};
use crate::config::{ARENA_SIZE, NUM_LISTS};
use crate::freelist::{FreeTable, class_of};
use crate::header::{
    ALLOC_HEADER_SIZE, BlockHeader, BlockState, UNALLOC_HEADER_SIZE, header_of, left_neighbor,
    payload_of, right_neighbor, write_boundary,
};
use crate::source::MemorySource;
use core::ptr;
use log::{error, trace};

/// Round a request up to its total block size: payload to the next multiple
/// of 8, plus boundary metadata, raised to the minimum viable block.
#[must_use]
pub(crate) const fn actual_size(raw_size: usize) -> usize {
    let rounded = (raw_size + 7) & !7;
    let total = rounded + ALLOC_HEADER_SIZE;
    if total < UNALLOC_HEADER_SIZE {
        UNALLOC_HEADER_SIZE
    } else {
        total
    }
}

/// A block-managed heap over a growable sequence of arenas.
///
/// The value embeds the free-list sentinels, so it must not move once
/// [`init`](Self::init) has run: place it in a `static` (the production
/// configuration) or behind a `Box`.
pub struct Heap<S> {
    pub(crate) table: FreeTable,
    pub(crate) chunks: ChunkRegistry,
    /// Right fencepost of the most recently obtained arena; a fresh arena
    /// whose left edge lands exactly one fencepost past this address is
    /// physically contiguous with the previous one.
    pub(crate) last_fencepost: *mut BlockHeader,
    /// First byte of the first arena, kept for offset diagnostics.
    pub(crate) base: *mut u8,
    /// `None` until [`init`](Self::init); doubles as the init flag.
    pub(crate) source: Option<S>,
}

// Safety: the raw pointers all target arena memory exclusively owned by this
// value; access is serialized by the caller (the public surface locks).
unsafe impl<S: Send> Send for Heap<S> {}

impl<S: MemorySource> Default for Heap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> Heap<S> {
    /// An uninitialized heap; usable only after [`init`](Self::init).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: FreeTable::new(),
            chunks: ChunkRegistry::new(),
            last_fencepost: ptr::null_mut(),
            base: ptr::null_mut(),
            source: None,
        }
    }

    /// Whether [`init`](Self::init) has completed.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.source.is_some()
    }

    /// Bootstrap the heap: adopt `source`, empty the free lists and obtain
    /// the first arena.
    ///
    /// # Safety
    /// Must be called exactly once, before any other operation, with the
    /// heap already at its final address; the heap must not move afterwards.
    pub unsafe fn init(&mut self, source: S) {
        self.source = Some(source);
        self.table.init();

        let block = unsafe { self.obtain_chunk(ARENA_SIZE) };
        unsafe {
            let first_fencepost = left_neighbor(block);
            self.chunks.push(first_fencepost);
            self.last_fencepost = right_neighbor(block);
            self.base = first_fencepost.cast();
            self.table.insert(block);
        }
        trace!("heap initialized with a {ARENA_SIZE} byte arena");
    }

    /// Allocate at least `raw_size` bytes, 8-aligned.
    ///
    /// Returns null for `raw_size == 0`; otherwise the pointer targets a
    /// block of total size `actual_size(raw_size)`.
    ///
    /// # Panics
    /// When the memory source is exhausted.
    ///
    /// # Safety
    /// The heap must be initialized and not have moved since.
    #[must_use]
    pub unsafe fn allocate(&mut self, raw_size: usize) -> *mut u8 {
        if raw_size == 0 {
            return ptr::null_mut();
        }
        let actual = actual_size(raw_size);
        let first_class = class_of(actual);
        loop {
            if let Some(block) = unsafe { self.search(first_class, actual) } {
                return unsafe { payload_of(block) };
            }
            unsafe { self.grow_heap() };
        }
    }

    /// First-fit over the classes `first_class..`, taking or splitting the
    /// first block large enough for `actual` bytes.
    unsafe fn search(&mut self, first_class: usize, actual: usize) -> Option<*mut BlockHeader> {
        for class in first_class..NUM_LISTS {
            // Empty classes hold nothing by construction; only the final,
            // size-unbounded class must always be walked.
            if self.table.is_empty(class) && class != NUM_LISTS - 1 {
                continue;
            }
            let sentinel = self.table.sentinel_mut(class);
            let mut candidate = unsafe { (*sentinel).link.next };
            while !ptr::eq(candidate, sentinel) {
                let candidate_size = unsafe { (*candidate).size() };
                if candidate_size >= actual {
                    return Some(unsafe { self.take(candidate, candidate_size, actual, class) });
                }
                // Undersized blocks occur only in the final class.
                candidate = unsafe { (*candidate).link.next };
            }
        }
        None
    }

    /// Allocate from `block`, splitting off the tail when the residue can
    /// stand alone as a free block.
    unsafe fn take(
        &mut self,
        block: *mut BlockHeader,
        block_size: usize,
        actual: usize,
        class: usize,
    ) -> *mut BlockHeader {
        unsafe {
            if block_size - actual < UNALLOC_HEADER_SIZE {
                (*block).set_state(BlockState::Allocated);
                FreeTable::remove(block);
                return block;
            }

            // Shrink the head in place; the tail becomes the allocation.
            let residue = block_size - actual;
            (*block).set_size(residue);
            let tail = right_neighbor(block);
            write_boundary(tail, actual, BlockState::Allocated, residue);
            (*right_neighbor(tail)).set_left_size(actual);

            if class_of(residue) != class {
                self.table.update(block);
            }
            tail
        }
    }

    /// Return `payload` to the heap, fusing with free memory neighbors.
    ///
    /// A null `payload` is a no-op.
    ///
    /// # Panics
    /// When the block is already free (double free).
    ///
    /// # Safety
    /// `payload` must be null or a pointer previously returned by this heap
    /// and not freed since; the heap must not have moved since `init`.
    pub unsafe fn deallocate(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        unsafe {
            let block = header_of(payload);
            if (*block).state() == BlockState::Unallocated {
                error!(
                    "double free detected at offset {}",
                    self.offset_from_base(block)
                );
                panic!("double free detected");
            }
            (*block).set_state(BlockState::Unallocated);

            let left = left_neighbor(block);
            let right = right_neighbor(block);
            let left_free = (*left).state() == BlockState::Unallocated;
            let right_free = (*right).state() == BlockState::Unallocated;

            match (left_free, right_free) {
                (true, true) => {
                    let old_class = class_of((*left).size());
                    let fused = (*left).size() + (*block).size() + (*right).size();
                    (*left).set_size(fused);
                    (*right_neighbor(right)).set_left_size(fused);
                    FreeTable::remove(right);
                    if class_of(fused) != old_class {
                        self.table.update(left);
                    }
                }
                (true, false) => {
                    let old_class = class_of((*left).size());
                    let fused = (*left).size() + (*block).size();
                    (*left).set_size(fused);
                    (*right).set_left_size(fused);
                    if class_of(fused) != old_class {
                        self.table.update(left);
                    }
                }
                (false, true) => {
                    let fused = (*block).size() + (*right).size();
                    (*right_neighbor(right)).set_left_size(fused);
                    (*block).set_size(fused);
                    FreeTable::remove(right);
                    self.table.insert(block);
                }
                (false, false) => self.table.insert(block),
            }
        }
    }

    /// Resize an allocation, preserving `min(old payload, new size)` bytes.
    ///
    /// A null `payload` behaves like [`allocate`](Self::allocate); a zero
    /// `raw_size` frees and returns null. The data always moves to a fresh
    /// block; in-place shrinking is not attempted.
    ///
    /// # Panics
    /// As [`allocate`](Self::allocate) and [`deallocate`](Self::deallocate).
    ///
    /// # Safety
    /// As [`deallocate`](Self::deallocate).
    #[must_use]
    pub unsafe fn reallocate(&mut self, payload: *mut u8, raw_size: usize) -> *mut u8 {
        unsafe {
            if payload.is_null() {
                return self.allocate(raw_size);
            }
            if raw_size == 0 {
                self.deallocate(payload);
                return ptr::null_mut();
            }
            let old_payload = (*header_of(payload)).size() - ALLOC_HEADER_SIZE;
            let moved = self.allocate(raw_size);
            ptr::copy_nonoverlapping(payload, moved, old_payload.min(raw_size));
            self.deallocate(payload);
            moved
        }
    }

    /// Obtain one arena from the source and lay it out.
    unsafe fn obtain_chunk(&mut self, size: usize) -> *mut BlockHeader {
        let Some(source) = self.source.as_mut() else {
            panic!("heap used before initialization");
        };
        let Some(mem) = source.grow(size) else {
            error!("memory source exhausted requesting {size} bytes");
            panic!("out of memory");
        };
        unsafe { carve_chunk(mem, size) }
    }

    /// Grow the heap by one arena, fusing with the previous arena when the
    /// source returned physically contiguous memory.
    unsafe fn grow_heap(&mut self) {
        unsafe {
            let block = self.obtain_chunk(ARENA_SIZE);
            let first_fencepost = left_neighbor(block);
            let second_fencepost = right_neighbor(block);

            // Where the previous arena's right fencepost would sit if the
            // two regions touch.
            let prev_fencepost = first_fencepost.byte_sub(ALLOC_HEADER_SIZE);
            let contiguous = ptr::eq(prev_fencepost, self.last_fencepost);
            if contiguous {
                self.fuse_chunks(prev_fencepost, block);
            } else {
                self.chunks.push(first_fencepost);
                self.table.insert(block);
            }
            self.last_fencepost = second_fencepost;
            trace!(
                "heap grew by {ARENA_SIZE} bytes (arenas: {}, contiguous: {contiguous})",
                self.chunks.len()
            );
        }
    }

    /// Fuse a physically contiguous fresh arena with its predecessor,
    /// absorbing the two inner fenceposts.
    unsafe fn fuse_chunks(&mut self, prev_fencepost: *mut BlockHeader, block: *mut BlockHeader) {
        unsafe {
            let prev_block = left_neighbor(prev_fencepost);
            let second_fencepost = right_neighbor(block);

            let fused;
            if (*prev_block).state() == BlockState::Unallocated {
                // The predecessor's tail block swallows both fenceposts and
                // the fresh block.
                let old_class = class_of((*prev_block).size());
                fused = (*prev_block).size() + (*block).size() + 2 * ALLOC_HEADER_SIZE;
                (*prev_block).set_size(fused);
                if class_of(fused) != old_class {
                    self.table.update(prev_block);
                }
            } else {
                // The fencepost pair itself becomes the header of the new
                // free block.
                fused = (*block).size() + 2 * ALLOC_HEADER_SIZE;
                (*prev_fencepost).set_size(fused);
                (*prev_fencepost).set_state(BlockState::Unallocated);
                self.table.insert(prev_fencepost);
            }
            (*second_fencepost).set_left_size(fused);
        }
    }

    /// Byte distance of `header` from the start of the first arena.
    pub(crate) fn offset_from_base(&self, header: *const BlockHeader) -> isize {
        let header = header.addr() as isize;
        header.wrapping_sub(self.base.addr() as isize)
    }
}
