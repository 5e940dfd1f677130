//! # Public allocator surface
//!
//! The classic four-operation interface over one process-wide
//! [`heap_core::Heap`], plus [`verify`]. Every operation acquires a single
//! global spinlock on entry and releases it on return, so operations are
//! linearizable in lock order; nothing blocks inside the critical section
//! except the memory source during arena growth.
//!
//! The heap is initialized lazily on first use and draws its arenas from a
//! statically reserved backing region sized so that every registrable arena
//! fits. Returned memory is 8-byte aligned; stronger alignments are not
//! provided (the [`GlobalAlloc`] adapter refuses them).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use heap_core::config::{ARENA_SIZE, MAX_NUM_CHUNKS};
use heap_core::{Heap, StaticRegion};
use heap_sync::SpinLock;

/// Total size of the statically reserved backing region: room for every
/// arena the registry can record.
const BACKING_SIZE: usize = MAX_NUM_CHUNKS * ARENA_SIZE;

/// Backing storage with a minimum alignment suitable for block headers.
#[repr(align(16))]
struct HeapMem([u8; BACKING_SIZE]);

static mut HEAP_MEM: HeapMem = HeapMem([0; BACKING_SIZE]);

/// Global allocator state protected by the process-wide lock.
static HEAP: SpinLock<Heap<StaticRegion>> = SpinLock::new(Heap::new());

/// One-time initialization flag.
static DID_INIT: AtomicBool = AtomicBool::new(false);

/// Ensure the heap is initialized (idempotent).
///
/// Adopts the static backing region and obtains the first arena exactly
/// once, before the first real operation touches the heap.
fn ensure_init() {
    if !DID_INIT.load(Ordering::Acquire) {
        HEAP.with_lock(|heap| {
            if !heap.is_initialized() {
                let start = unsafe { (&raw mut HEAP_MEM.0).cast::<u8>() };
                unsafe { heap.init(StaticRegion::new(start, BACKING_SIZE)) };
                DID_INIT.store(true, Ordering::Release);
            }
        });
    }
}

/// Allocate at least `size` bytes, 8-byte aligned.
///
/// Returns null for `size == 0`.
///
/// # Panics
/// When the backing region is exhausted.
#[must_use]
pub fn allocate(size: usize) -> *mut u8 {
    ensure_init();
    HEAP.with_lock(|heap| unsafe { heap.allocate(size) })
}

/// Allocate `count * size` bytes and zero all of them.
///
/// Returns null when the product is zero or overflows.
///
/// # Panics
/// As [`allocate`].
#[must_use]
pub fn allocate_zeroed(count: usize, size: usize) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
        return ptr::null_mut();
    };
    let payload = allocate(total);
    if !payload.is_null() {
        unsafe { ptr::write_bytes(payload, 0, total) };
    }
    payload
}

/// Resize an allocation, preserving `min(old payload, size)` bytes.
///
/// A null `payload` behaves like [`allocate`]; `size == 0` frees and
/// returns null.
///
/// # Panics
/// As [`allocate`] and [`deallocate`].
///
/// # Safety
/// `payload` must be null or a pointer previously returned by this
/// allocator and not freed since.
#[must_use]
pub unsafe fn reallocate(payload: *mut u8, size: usize) -> *mut u8 {
    ensure_init();
    HEAP.with_lock(|heap| unsafe { heap.reallocate(payload, size) })
}

/// Return an allocation to the heap.
///
/// A null `payload` is a no-op.
///
/// # Panics
/// When `payload` is already free (double free is fatal).
///
/// # Safety
/// `payload` must be null or a pointer previously returned by this
/// allocator and not freed since.
pub unsafe fn deallocate(payload: *mut u8) {
    ensure_init();
    HEAP.with_lock(|heap| unsafe { heap.deallocate(payload) });
}

/// Run the structural invariant checks; `true` when the heap is sound.
#[must_use]
pub fn verify() -> bool {
    ensure_init();
    HEAP.with_lock(|heap| heap.verify())
}

/// [`GlobalAlloc`] adapter over the global heap.
///
/// Register it with `#[global_allocator]` to route a program's allocations
/// through this allocator. Alignments above 8 are refused with a null
/// return, as permitted by the `GlobalAlloc` contract.
pub struct HeapAlloc;

unsafe impl GlobalAlloc for HeapAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > 8 {
            return ptr::null_mut();
        }
        allocate(layout.size())
    }

    unsafe fn dealloc(&self, payload: *mut u8, _layout: Layout) {
        unsafe { deallocate(payload) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > 8 {
            return ptr::null_mut();
        }
        allocate_zeroed(1, layout.size())
    }

    unsafe fn realloc(&self, payload: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > 8 {
            return ptr::null_mut();
        }
        unsafe { reallocate(payload, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::thread;

    /// All tests share the one global heap; serialize them so assertions
    /// about reuse and zeroing are deterministic.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn round_trip_and_verify() {
        let _guard = serial();
        let p = allocate(100);
        assert!(!p.is_null());
        assert_eq!(p.addr() % 8, 0);
        unsafe {
            ptr::write_bytes(p, 0x5A, 100);
            assert_eq!(*p.add(99), 0x5A);
            deallocate(p);
        }
        assert!(verify());
    }

    #[test]
    fn zero_sized_request_returns_null() {
        let _guard = serial();
        assert!(allocate(0).is_null());
    }

    #[test]
    fn zeroed_allocation_clears_every_byte() {
        let _guard = serial();
        // Dirty a block, free it, then request the same class zeroed; LIFO
        // reuse hands the dirty bytes back.
        let p = allocate(96);
        unsafe {
            ptr::write_bytes(p, 0xAA, 96);
            deallocate(p);
        }
        let q = allocate_zeroed(12, 8);
        assert!(!q.is_null());
        unsafe {
            for offset in 0..96 {
                assert_eq!(*q.add(offset), 0, "stale byte at {offset}");
            }
            deallocate(q);
        }
        assert!(verify());
    }

    #[test]
    fn zeroed_allocation_rejects_overflow() {
        let _guard = serial();
        assert!(allocate_zeroed(usize::MAX, 2).is_null());
    }

    #[test]
    fn reallocate_preserves_prefix() {
        let _guard = serial();
        unsafe {
            let p = allocate(24);
            for offset in 0..24 {
                *p.add(offset) = offset as u8;
            }
            let q = reallocate(p, 200);
            assert!(!q.is_null());
            for offset in 0..24 {
                assert_eq!(*q.add(offset), offset as u8);
            }
            deallocate(q);
        }
        assert!(verify());
    }

    #[test]
    fn global_alloc_adapter_respects_alignment_limit() {
        let _guard = serial();
        unsafe {
            let narrow = Layout::from_size_align(64, 8).unwrap();
            let p = HeapAlloc.alloc(narrow);
            assert!(!p.is_null());
            HeapAlloc.dealloc(p, narrow);

            let wide = Layout::from_size_align(64, 16).unwrap();
            assert!(HeapAlloc.alloc(wide).is_null());
            assert!(HeapAlloc.alloc_zeroed(wide).is_null());
        }
        assert!(verify());
    }

    #[test]
    fn operations_are_thread_safe() {
        let _guard = serial();
        let mut handles = Vec::new();
        for seed in 0..4u8 {
            handles.push(thread::spawn(move || {
                for round in 0..64usize {
                    let size = (usize::from(seed) * 8 + round % 32) + 1;
                    let p = allocate(size);
                    assert!(!p.is_null());
                    unsafe {
                        ptr::write_bytes(p, seed, size);
                        deallocate(p);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(verify());
    }
}
