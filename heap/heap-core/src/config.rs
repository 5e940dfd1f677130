//! Compile-time allocator configuration.

use crate::header::{ALLOC_HEADER_SIZE, UNALLOC_HEADER_SIZE};

/// Bytes requested from the memory source per arena.
///
/// Must be a multiple of 8 and leave room for two fenceposts plus one
/// minimum-sized block. Adjust as needed; larger arenas amortize source
/// requests at the cost of a coarser growth granularity.
pub const ARENA_SIZE: usize = 4096;

/// Number of segregated size classes.
///
/// Class `i` holds blocks with a payload of exactly `(i + 1) * 8` bytes; the
/// final class aggregates everything larger.
pub const NUM_LISTS: usize = 59;

/// Capacity of the arena registry.
///
/// Arenas beyond this count remain fully functional but are invisible to the
/// verifier and diagnostics.
pub const MAX_NUM_CHUNKS: usize = 1024;

const _: () = assert!(ARENA_SIZE % 8 == 0, "arenas must preserve block alignment");
const _: () = assert!(
    ARENA_SIZE >= 2 * ALLOC_HEADER_SIZE + UNALLOC_HEADER_SIZE,
    "an arena must fit two fenceposts and one minimum block"
);
const _: () = assert!(NUM_LISTS >= 1);
