use std::io;

use thiserror::Error;

/// Failure reported by a [`Region`](crate::Region) that cannot grow.
#[derive(Debug, Error)]
pub enum GrowError {
  #[error("region exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("growing by {requested} bytes overflows the address space")]
  Overflow { requested: usize },

  #[error("failed to reserve {capacity} bytes of address space")]
  Reserve {
    capacity: usize,
    #[source]
    source: io::Error,
  },
}

/// A broken registry invariant found by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionError {
  #[error("block at {offset:#x} should start at {expected:#x}")]
  Misplaced { offset: usize, expected: usize },

  #[error("block at {offset:#x} links back to {found:?}, expected {expected:?}")]
  BrokenLink {
    offset: usize,
    found: Option<usize>,
    expected: Option<usize>,
  },

  #[error("block at {offset:#x} runs past the region end {end:#x}")]
  OutOfBounds { offset: usize, end: usize },

  #[error("adjacent blocks at {first:#x} and {second:#x} are both free")]
  Uncoalesced { first: usize, second: usize },

  #[error("block at {offset:#x} records {size} bytes but spans only {extent}")]
  SizeExceedsExtent {
    offset: usize,
    size: usize,
    extent: usize,
  },

  #[error("tail points at {found:?} but the last block is at {expected:?}")]
  StaleTail {
    found: Option<usize>,
    expected: Option<usize>,
  },
}
