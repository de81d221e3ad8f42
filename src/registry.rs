//! Address-ordered list of block headers stored inside the region.
//!
//! The registry only remembers where the first and last headers are. Every
//! other link lives in the headers themselves, so all operations take the
//! region bytes they describe. The end of the slice is the current break.

use log::trace;

use crate::block::{Block, HEADER_SIZE};

#[derive(Debug, Default)]
pub(crate) struct Registry {
  head: Option<usize>,
  tail: Option<usize>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn head(&self) -> Option<usize> {
    self.head
  }

  pub fn tail(&self) -> Option<usize> {
    self.tail
  }

  /// Payload bytes physically available to the block at `at`: everything up
  /// to the next header, or up to the break for the last block.
  pub fn extent(
    mem: &[u8],
    at: usize,
  ) -> usize {
    let end = Block::read(mem, at).next.unwrap_or(mem.len());
    end - at - HEADER_SIZE
  }

  /// Links a freshly grown, in-use block of `size` bytes after the tail.
  pub fn append(
    &mut self,
    mem: &mut [u8],
    at: usize,
    size: usize,
  ) {
    Block::new(size, false, None, self.tail).write(mem, at);

    match self.tail {
      Some(tail) => {
        let mut last = Block::read(mem, tail);
        last.next = Some(at);
        last.write(mem, tail);
      },
      None => self.head = Some(at),
    }

    self.tail = Some(at);
  }

  /// First free block, in address order, with room for a header plus `size`.
  pub fn find_first_fit(
    &self,
    mem: &[u8],
    size: usize,
  ) -> Option<usize> {
    let needed = HEADER_SIZE.checked_add(size)?;
    let mut current = self.head;

    while let Some(at) = current {
      let block = Block::read(mem, at);

      if block.is_free && Self::extent(mem, at) >= needed {
        return Some(at);
      }
      current = block.next;
    }

    None
  }

  /// Carves a free block out of everything past the first `size` payload
  /// bytes of the block at `at`, if more than a header's worth is left over.
  ///
  /// The block at `at` keeps its recorded size; the caller sets it. Returns
  /// the offset of the new free block.
  pub fn split(
    &mut self,
    mem: &mut [u8],
    at: usize,
    size: usize,
  ) -> Option<usize> {
    let leftover = Self::extent(mem, at).checked_sub(size)?;
    if leftover <= HEADER_SIZE {
      return None;
    }

    let mut block = Block::read(mem, at);
    let rest = at + HEADER_SIZE + size;
    let end = block.next.unwrap_or(mem.len());

    Block::new(end - rest - HEADER_SIZE, true, block.next, Some(at)).write(mem, rest);

    match block.next {
      Some(next) => {
        let mut after = Block::read(mem, next);
        after.prev = Some(rest);
        after.write(mem, next);
      },
      None => self.tail = Some(rest),
    }

    block.next = Some(rest);
    block.write(mem, at);

    trace!("split block {at:#x} at {size} bytes, free remainder {rest:#x}");
    Some(rest)
  }

  /// Merges the free block at `at` with whichever address neighbours are
  /// free. Returns the offset of the merged block.
  ///
  /// Neighbours of a free block are never free themselves, so one hop in
  /// each direction is enough.
  pub fn coalesce(
    &mut self,
    mem: &mut [u8],
    at: usize,
  ) -> usize {
    let mut block = Block::read(mem, at);

    if let Some(next) = block.next {
      let absorbed = Block::read(mem, next);

      if absorbed.is_free {
        self.unlink_after(mem, at, &mut block, absorbed.next);
        trace!("block {at:#x} absorbed {next:#x}");
      }
    }

    if let Some(prev) = block.prev {
      let mut before = Block::read(mem, prev);

      if before.is_free {
        self.unlink_after(mem, prev, &mut before, block.next);
        trace!("block {prev:#x} absorbed {at:#x}");
        return prev;
      }
    }

    at
  }

  /// Drops whatever sits between `block` (at `at`) and `next` from the list
  /// and grows `block` over the freed span.
  fn unlink_after(
    &mut self,
    mem: &mut [u8],
    at: usize,
    block: &mut Block,
    next: Option<usize>,
  ) {
    block.next = next;

    match next {
      Some(next) => {
        let mut after = Block::read(mem, next);
        after.prev = Some(at);
        after.write(mem, next);
      },
      None => self.tail = Some(at),
    }

    block.size = next.unwrap_or(mem.len()) - at - HEADER_SIZE;
    block.write(mem, at);
  }

  pub fn iter<'a>(
    &self,
    mem: &'a [u8],
  ) -> Iter<'a> {
    Iter {
      mem,
      current: self.head(),
    }
  }
}

/// Walks headers in address order, yielding `(offset, header)`.
pub(crate) struct Iter<'a> {
  mem: &'a [u8],
  current: Option<usize>,
}

impl Iterator for Iter<'_> {
  type Item = (usize, Block);

  fn next(&mut self) -> Option<Self::Item> {
    let at = self.current?;
    let block = Block::read(self.mem, at);
    self.current = block.next;
    Some((at, block))
  }
}
