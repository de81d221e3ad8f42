//! # brkheap - A First-Fit Heap over a Growing Region
//!
//! This crate provides a `malloc`/`realloc`/`free` style allocator that sits
//! on top of a single primitive: a region that can only grow at its end, the
//! way `sbrk(2)` grows the program break.
//!
//! ## Overview
//!
//! Every block carries a header directly in front of its payload. Headers
//! form an address-ordered, doubly linked list that tiles the grown region
//! with no gaps:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           REGION                                     │
//!   │                                                                      │
//!   │   ┌────┬───────┬────┬──────────┬────┬──────┬────┬────────────────┐   │
//!   │   │ H  │ used  │ H  │   free   │ H  │ used │ H  │     used       │   │
//!   │   └────┴───────┴────┴──────────┴────┴──────┴────┴────────────────┘   │
//!   │   ▲                                                              ▲   │
//!   │   │                                                              │   │
//!   │  Base                                                        Break   │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **allocate** takes the first free block, in address order, that can hold
//!   the request plus one header of slack, and splits off the rest. When none
//!   fits, the region grows by exactly one header plus the request.
//! - **release** marks the block free and merges it with free neighbours, so
//!   no two adjacent blocks are ever both free.
//! - **resize** shrinks in place, or moves the contents to a new block.
//!
//! ## Crate Structure
//!
//! ```text
//!   brkheap
//!   ├── align      - align_to! rounding macro
//!   ├── block      - Block header layout (internal)
//!   ├── registry   - Address-ordered block list (internal)
//!   ├── heap       - Heap allocator
//!   ├── region     - Region trait and Vec-backed ArenaRegion
//!   ├── reserved   - mmap-backed ReservedRegion
//!   └── error      - GrowError, CorruptionError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkheap::{ArenaRegion, Heap};
//!
//! let mut heap = Heap::new(ArenaRegion::new());
//!
//! let ptr = heap.allocate(16).unwrap();
//! heap.payload_mut(ptr).copy_from_slice(b"hello, brkheap!!");
//!
//! let ptr = heap.resize(Some(ptr), 64).unwrap();
//! assert_eq!(&heap.payload(ptr)[..16], b"hello, brkheap!!");
//!
//! heap.release(Some(ptr));
//! heap.check().unwrap();
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **No alignment guarantees**: Payloads start right after their header
//! - **Memory is never returned**: The region only grows
//! - **Handles are trusted**: Releasing a foreign or stale handle is not
//!   detected

pub mod align;
mod block;
mod error;
mod heap;
mod region;
mod registry;
mod reserved;

pub use block::HEADER_SIZE;
pub use error::{CorruptionError, GrowError};
pub use heap::{BlockInfo, Heap, HeapPtr, HeapStats};
pub use region::{ArenaRegion, Region};
pub use reserved::ReservedRegion;
