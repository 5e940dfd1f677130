//! # Segregated-fit block manager
//!
//! The engine behind the allocator: a segregated free-list structure with
//! boundary-tag coalescing over multiple arenas obtained from an
//! `sbrk`-style memory source.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Heap (engine)                    │
//! │    • request rounding and first-fit search          │
//! │    • tail splits, three-way coalescing              │
//! │    • arena growth and cross-arena fusion            │
//! └───────┬──────────────────┬──────────────────────────┘
//!         │                  │
//! ┌───────▼────────┐ ┌───────▼─────────────────────────┐
//! │ FreeTable      │ │ Arenas                          │
//! │  • 59 classes  │ │  • fencepost-bracketed regions  │
//! │  • LIFO lists  │ │  • registry for the verifier    │
//! └───────┬────────┘ └───────┬─────────────────────────┘
//!         │                  │
//! ┌───────▼──────────────────▼──────────────────────────┐
//! │ BlockHeader codec                                   │
//! │  • packed size/state word, boundary tags            │
//! │  • free-list links overlaid on user bytes           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key invariants
//!
//! Between any two public operations:
//!
//! - every arena byte belongs to exactly one block, reachable by walking
//!   right from the arena's left fencepost;
//! - each block's size matches its right neighbor's `left_size`;
//! - no two adjacent blocks are both free (coalescing is immediate);
//! - every free block sits on exactly one class list, and the lists are
//!   acyclic with symmetric links.
//!
//! [`Heap::verify`] checks all of this without mutating anything.
//!
//! The engine performs no locking itself; the public surface serializes
//! access. It also never returns memory to its source.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod arena;
pub mod config;
mod freelist;
mod header;
mod heap;
mod source;
mod verify;

pub use header::{ALLOC_HEADER_SIZE, BlockState, UNALLOC_HEADER_SIZE};
pub use heap::Heap;
pub use source::{MemorySource, StaticRegion};
pub use verify::HeapCorruption;
