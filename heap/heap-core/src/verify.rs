//! # Structural verifier
//!
//! Pure inspection of the free lists and boundary tags; never mutates. The
//! first anomaly found is reported through the log sink, with block
//! positions given as byte offsets from the heap base, and turns the result
//! `false`. Corruption is never repaired.

use crate::config::NUM_LISTS;
use crate::header::{BlockHeader, BlockState, right_neighbor};
use crate::heap::Heap;
use crate::source::MemorySource;
use core::ptr;
use log::error;

/// A structural invariant violation found by [`Heap::verify`].
///
/// Offsets are byte distances from the start of the first arena.
#[derive(Debug, thiserror::Error)]
pub enum HeapCorruption {
    #[error("cycle in free list {class}")]
    FreeListCycle { class: usize },
    #[error("mismatched links in free list {class} at offset {offset}")]
    MismatchedLinks { class: usize, offset: isize },
    #[error("arena {chunk} does not begin with a fencepost (offset {offset})")]
    MissingFencepost { chunk: usize, offset: isize },
    #[error("boundary tag mismatch at offset {offset}: size {size}, neighbor expects {left_size}")]
    MismatchedTags {
        offset: isize,
        size: usize,
        left_size: usize,
    },
}

impl<S: MemorySource> Heap<S> {
    /// Check every structural invariant; `true` when all of them hold.
    ///
    /// Violations are logged with the offending block's offset.
    #[must_use]
    pub fn verify(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(fault) => {
                error!("heap verification failed: {fault}");
                false
            }
        }
    }

    fn check(&self) -> Result<(), HeapCorruption> {
        self.check_cycles()?;
        self.check_links()?;
        self.check_tags()
    }

    /// Floyd's tortoise and hare over every free list.
    fn check_cycles(&self) -> Result<(), HeapCorruption> {
        for class in 0..NUM_LISTS {
            let sentinel = self.table.sentinel(class);
            unsafe {
                let mut slow = (*sentinel).link.next.cast_const();
                let mut fast = (*slow).link.next.cast_const();
                while !ptr::eq(fast, sentinel) {
                    if ptr::eq(slow, fast) {
                        return Err(HeapCorruption::FreeListCycle { class });
                    }
                    slow = (*slow).link.next.cast_const();
                    fast = (*(*fast).link.next).link.next.cast_const();
                }
            }
        }
        Ok(())
    }

    /// `node.next.prev == node` and `node.prev.next == node` everywhere.
    fn check_links(&self) -> Result<(), HeapCorruption> {
        for class in 0..NUM_LISTS {
            let sentinel = self.table.sentinel(class);
            unsafe {
                let mut node = (*sentinel).link.next.cast_const();
                while !ptr::eq(node, sentinel) {
                    let back_from_next = (*(*node).link.next).link.prev.cast_const();
                    let back_from_prev = (*(*node).link.prev).link.next.cast_const();
                    if !ptr::eq(back_from_next, node) || !ptr::eq(back_from_prev, node) {
                        return Err(HeapCorruption::MismatchedLinks {
                            class,
                            offset: self.offset_from_base(node),
                        });
                    }
                    node = (*node).link.next.cast_const();
                }
            }
        }
        Ok(())
    }

    /// Walk each registered arena left to right, checking that every block's
    /// size agrees with its right neighbor's `left_size`.
    fn check_tags(&self) -> Result<(), HeapCorruption> {
        for (chunk, fencepost) in self.chunks.iter().enumerate() {
            unsafe {
                if (*fencepost).state() != BlockState::Fencepost {
                    return Err(HeapCorruption::MissingFencepost {
                        chunk,
                        offset: self.offset_from_base(fencepost),
                    });
                }
                let mut block: *const BlockHeader = fencepost;
                loop {
                    let right = right_neighbor(block.cast_mut()).cast_const();
                    if (*right).left_size() != (*block).size() {
                        return Err(HeapCorruption::MismatchedTags {
                            offset: self.offset_from_base(block),
                            size: (*block).size(),
                            left_size: (*right).left_size(),
                        });
                    }
                    block = right;
                    if (*block).state() == BlockState::Fencepost {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
