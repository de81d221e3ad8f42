use std::fmt;

use log::{debug, trace};

use crate::{
  CorruptionError, Region,
  block::{Block, HEADER_SIZE},
  registry::Registry,
};

/// Handle to a payload handed out by a [`Heap`].
///
/// It is the payload's offset from the start of the region; the block header
/// sits [`HEADER_SIZE`] bytes before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(usize);

impl HeapPtr {
  fn from_header(at: usize) -> Self {
    Self(at + HEADER_SIZE)
  }

  fn header(self) -> usize {
    self.0 - HEADER_SIZE
  }

  /// Offset of the payload from the start of the region.
  pub fn offset(self) -> usize {
    self.0
  }
}

impl fmt::LowerHex for HeapPtr {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    fmt::LowerHex::fmt(&self.0, f)
  }
}

/// One entry of the block registry, as reported by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the header.
  pub offset: usize,
  pub payload: HeapPtr,
  /// Size granted by the last allocate or resize.
  pub size: usize,
  /// Payload bytes physically owned, up to the next header or the break.
  pub extent: usize,
  pub is_free: bool,
}

/// Totals over the whole registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes obtained from the region so far.
  pub grown: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  /// Sum of recorded sizes of in-use blocks.
  pub live_bytes: usize,
  /// Sum of extents of free blocks.
  pub free_bytes: usize,
}

/// First-fit allocator over a growable [`Region`].
///
/// ```text
///   region base                                                   break
///   ┌────────┬──────────┬────────┬──────┬────────┬────────────────┐
///   │ header │ payload  │ header │ free │ header │ payload        │
///   └────────┴──────────┴────────┴──────┴────────┴────────────────┘
///      │  ▲ HeapPtr        ▲ │              ▲  │
///      └───── next ────────┘ └──── next ────┘  └─> none
/// ```
///
/// Not synchronized: wrap it in a mutex to share it between threads.
#[derive(Debug)]
pub struct Heap<R> {
  region: R,
  registry: Registry,
  base: usize,
}

impl<R: Region> Heap<R> {
  /// Builds a heap that owns every byte `region` grows from now on.
  pub fn new(region: R) -> Self {
    let base = region.len();

    Self {
      region,
      registry: Registry::new(),
      base,
    }
  }

  /// Hands out `size` bytes, or `None` for a zero-sized request or when the
  /// region cannot grow.
  ///
  /// Reused blocks keep whatever their previous owner left in them; only
  /// freshly grown payloads are zeroed.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<HeapPtr> {
    if size == 0 {
      return None;
    }

    if let Some(at) = self.registry.find_first_fit(self.region.bytes(), size) {
      let mem = self.region.bytes_mut();
      self.registry.split(mem, at, size);

      let mut block = Block::read(mem, at);
      block.is_free = false;
      block.size = size;
      block.write(mem, at);

      trace!("allocate({size}) reused block {at:#x}");
      return Some(HeapPtr::from_header(at));
    }

    let total = HEADER_SIZE.checked_add(size)?;
    let at = match self.region.grow(total) {
      Ok(at) => at,
      Err(err) => {
        debug!("allocate({size}) failed: {err}");
        return None;
      },
    };
    debug_assert_eq!(at + total, self.region.len(), "region grew out of order");

    let mem = self.region.bytes_mut();
    self.registry.append(mem, at, size);

    let ptr = HeapPtr::from_header(at);
    mem[ptr.offset()..ptr.offset() + size].fill(0);

    trace!("allocate({size}) grew block {at:#x}");
    Some(ptr)
  }

  /// Returns the block behind `ptr` to the heap and merges it with free
  /// neighbours. `None` is ignored.
  ///
  /// `ptr` must come from this heap and must not have been released already.
  /// That is not checked: misuse corrupts the registry or panics.
  pub fn release(
    &mut self,
    ptr: Option<HeapPtr>,
  ) {
    let Some(ptr) = ptr else {
      return;
    };

    let at = ptr.header();
    let mem = self.region.bytes_mut();

    let mut block = Block::read(mem, at);
    block.is_free = true;
    block.write(mem, at);

    let merged = self.registry.coalesce(mem, at);
    trace!("release({ptr:#x}) left free block {merged:#x}");
  }

  /// Changes the size of the allocation behind `ptr`.
  ///
  /// - `None` allocates `size` bytes.
  /// - A zero `size` releases `ptr` and returns `None`.
  /// - Growing moves the contents to a new block. If that block cannot be
  ///   obtained, `None` is returned and `ptr` stays valid and untouched.
  /// - Shrinking happens in place and frees the trimmed tail when it is large
  ///   enough to hold a block of its own.
  pub fn resize(
    &mut self,
    ptr: Option<HeapPtr>,
    size: usize,
  ) -> Option<HeapPtr> {
    let Some(ptr) = ptr else {
      return self.allocate(size);
    };

    if size == 0 {
      self.release(Some(ptr));
      return None;
    }

    let at = ptr.header();
    let current = self.size_of(ptr);

    if size > current {
      let moved = self.allocate(size)?;
      let src = ptr.offset();

      self
        .region
        .bytes_mut()
        .copy_within(src..src + current, moved.offset());
      self.release(Some(ptr));

      trace!("resize({ptr:#x}, {size}) moved to {moved:#x}");
      return Some(moved);
    }

    if size < current {
      let mem = self.region.bytes_mut();
      let rest = self.registry.split(mem, at, size);

      let mut block = Block::read(mem, at);
      block.size = size;
      block.write(mem, at);

      // the trimmed tail may now border a free block
      if let Some(rest) = rest {
        self.registry.coalesce(mem, rest);
      }

      trace!("resize({ptr:#x}, {size}) shrank in place");
    }

    Some(ptr)
  }

  /// Recorded size of the allocation behind `ptr`.
  pub fn size_of(
    &self,
    ptr: HeapPtr,
  ) -> usize {
    Block::read(self.region.bytes(), ptr.header()).size
  }

  /// The `size_of(ptr)` bytes owned by `ptr`.
  pub fn payload(
    &self,
    ptr: HeapPtr,
  ) -> &[u8] {
    let size = self.size_of(ptr);
    &self.region.bytes()[ptr.offset()..ptr.offset() + size]
  }

  pub fn payload_mut(
    &mut self,
    ptr: HeapPtr,
  ) -> &mut [u8] {
    let size = self.size_of(ptr);
    &mut self.region.bytes_mut()[ptr.offset()..ptr.offset() + size]
  }

  /// Every block in address order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    let mem = self.region.bytes();

    self.registry.iter(mem).map(move |(at, block)| BlockInfo {
      offset: at,
      payload: HeapPtr::from_header(at),
      size: block.size,
      extent: Registry::extent(mem, at),
      is_free: block.is_free,
    })
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        grown: self.region.len() - self.base,
        ..HeapStats::default()
      },
      |mut stats, block| {
        stats.blocks += 1;
        if block.is_free {
          stats.free_blocks += 1;
          stats.free_bytes += block.extent;
        } else {
          stats.live_bytes += block.size;
        }
        stats
      },
    )
  }

  /// Walks the registry and verifies that blocks tile the grown bytes in
  /// address order, that links agree in both directions, that no two
  /// neighbours are free and that no block records more than it owns.
  pub fn check(&self) -> Result<(), CorruptionError> {
    let mem = self.region.bytes();
    let end = mem.len();
    let mut expected = self.base;
    let mut prev: Option<(usize, Block)> = None;

    for (at, block) in self.registry.iter(mem) {
      if at != expected {
        return Err(CorruptionError::Misplaced {
          offset: at,
          expected,
        });
      }

      let prev_at = prev.map(|(offset, _)| offset);
      if block.prev != prev_at {
        return Err(CorruptionError::BrokenLink {
          offset: at,
          found: block.prev,
          expected: prev_at,
        });
      }

      let block_end = block.next.unwrap_or(end);
      let next_fits = block
        .next
        .is_none_or(|next| next.checked_add(HEADER_SIZE).is_some_and(|e| e <= end));
      if block_end > end || block_end < at + HEADER_SIZE || !next_fits {
        return Err(CorruptionError::OutOfBounds { offset: at, end });
      }

      if let Some((prev_at, prev_block)) = prev {
        if prev_block.is_free && block.is_free {
          return Err(CorruptionError::Uncoalesced {
            first: prev_at,
            second: at,
          });
        }
      }

      let extent = block_end - at - HEADER_SIZE;
      if block.size > extent {
        return Err(CorruptionError::SizeExceedsExtent {
          offset: at,
          size: block.size,
          extent,
        });
      }

      expected = block_end;
      prev = Some((at, block));
    }

    if expected != end {
      return Err(CorruptionError::Misplaced {
        offset: end,
        expected,
      });
    }

    let last = prev.map(|(offset, _)| offset);
    if self.registry.tail() != last {
      return Err(CorruptionError::StaleTail {
        found: self.registry.tail(),
        expected: last,
      });
    }

    Ok(())
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  pub fn into_region(self) -> R {
    self.region
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ArenaRegion, GrowError, ReservedRegion};

  /// Counts calls into the wrapped region.
  #[derive(Default)]
  struct CountingRegion {
    inner: ArenaRegion,
    grows: usize,
  }

  impl Region for CountingRegion {
    fn grow(
      &mut self,
      len: usize,
    ) -> Result<usize, GrowError> {
      self.grows += 1;
      self.inner.grow(len)
    }

    fn len(&self) -> usize {
      self.inner.len()
    }

    fn bytes(&self) -> &[u8] {
      self.inner.bytes()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
      self.inner.bytes_mut()
    }
  }

  fn shape<R: Region>(heap: &Heap<R>) -> Vec<(usize, usize, bool)> {
    heap
      .blocks()
      .map(|block| (block.offset, block.extent, block.is_free))
      .collect()
  }

  #[test]
  fn test_zero_size_never_grows() {
    let mut heap = Heap::new(CountingRegion::default());

    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.region().grows, 0);

    let a = heap.allocate(16);
    assert_eq!(heap.region().grows, 1);
    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.region().grows, 1);
    assert_eq!(heap.blocks().count(), 1);
    assert!(a.is_some());
  }

  #[test]
  fn test_first_fit_reuses_and_splits() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(50).unwrap();
    assert_eq!(a.offset(), HEADER_SIZE);
    assert_eq!(b.offset(), 2 * HEADER_SIZE + 100);

    heap.release(Some(a));
    assert_eq!(
      shape(&heap),
      vec![(0, 100, true), (HEADER_SIZE + 100, 50, false)]
    );

    let grown = heap.stats().grown;
    let c = heap.allocate(60).unwrap();

    assert_eq!(c, a);
    assert_eq!(heap.size_of(c), 60);
    assert_eq!(heap.stats().grown, grown);
    assert_eq!(
      shape(&heap),
      vec![
        (0, 60, false),
        (HEADER_SIZE + 60, 100 - 60 - HEADER_SIZE, true),
        (HEADER_SIZE + 100, 50, false),
      ]
    );
    heap.check().unwrap();
  }

  #[test]
  fn test_adjacent_releases_coalesce() {
    let mut heap = Heap::new(ArenaRegion::new());

    let x = heap.allocate(10).unwrap();
    let y = heap.allocate(10).unwrap();

    heap.release(Some(x));
    heap.check().unwrap();
    heap.release(Some(y));
    heap.check().unwrap();

    assert_eq!(shape(&heap), vec![(0, 2 * 10 + HEADER_SIZE, true)]);
    assert_eq!(heap.size_of(x), 2 * 10 + HEADER_SIZE);
  }

  #[test]
  fn test_release_merges_with_both_neighbours() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(10).unwrap();
    let b = heap.allocate(20).unwrap();
    let c = heap.allocate(30).unwrap();
    let d = heap.allocate(40).unwrap();

    heap.release(Some(a));
    heap.release(Some(c));
    assert_eq!(heap.stats().free_blocks, 2);

    heap.release(Some(b));
    heap.check().unwrap();

    let blocks: Vec<_> = heap.blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].payload, a);
    assert_eq!(blocks[0].extent, 10 + 20 + 30 + 2 * HEADER_SIZE);
    assert_eq!(blocks[1].payload, d);
  }

  #[test]
  fn test_release_none_is_noop() {
    let mut heap = Heap::new(ArenaRegion::new());
    heap.allocate(8).unwrap();

    heap.release(None);

    assert_eq!(heap.stats().free_blocks, 0);
    heap.check().unwrap();
  }

  #[test]
  fn test_fresh_memory_zeroed_reused_memory_not() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(64).unwrap();
    let guard = heap.allocate(8).unwrap();
    assert!(heap.payload(a).iter().all(|&b| b == 0));

    heap.payload_mut(a).fill(0xEE);
    heap.release(Some(a));

    let reused = heap.allocate(16).unwrap();
    assert_eq!(reused, a);
    assert!(heap.payload(reused).iter().all(|&b| b == 0xEE));

    let fresh = heap.allocate(64).unwrap();
    assert!(fresh > guard);
    assert!(heap.payload(fresh).iter().all(|&b| b == 0));
  }

  #[test]
  fn test_exhaustion_leaves_heap_untouched() {
    let limit = 2 * HEADER_SIZE + 100;
    let mut heap = Heap::new(ArenaRegion::with_limit(limit));

    let a = heap.allocate(50).unwrap();
    heap.payload_mut(a).fill(7);
    let before = shape(&heap);

    assert_eq!(heap.allocate(51), None);
    assert_eq!(heap.allocate(usize::MAX), None);
    assert_eq!(shape(&heap), before);
    assert!(heap.payload(a).iter().all(|&b| b == 7));

    assert!(heap.allocate(50).is_some());
    assert_eq!(heap.stats().grown, limit);
    heap.check().unwrap();
  }

  #[test]
  fn test_smaller_request_after_release_does_not_grow() {
    let mut heap = Heap::new(CountingRegion::default());

    let a = heap.allocate(100).unwrap();
    heap.release(Some(a));

    let grows = heap.region().grows;
    let b = heap.allocate(100 - HEADER_SIZE).unwrap();

    assert_eq!(b, a);
    assert_eq!(heap.region().grows, grows);
  }

  #[test]
  fn test_same_size_after_coalesced_release_does_not_grow() {
    let mut heap = Heap::new(CountingRegion::default());

    let a = heap.allocate(40).unwrap();
    let b = heap.allocate(40).unwrap();
    heap.allocate(8).unwrap();
    heap.release(Some(a));
    heap.release(Some(b));

    let grown = heap.stats().grown;
    assert_eq!(heap.allocate(40), Some(a));
    assert_eq!(heap.allocate(40 - HEADER_SIZE), Some(b));
    assert_eq!(heap.stats().grown, grown);
    heap.check().unwrap();
  }

  #[test]
  fn test_fit_without_split_keeps_extent() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(100).unwrap();
    heap.allocate(8).unwrap();
    heap.release(Some(a));

    // leftover is exactly one header: no split, but size still shrinks
    let b = heap.allocate(100 - HEADER_SIZE).unwrap();
    let info = heap.blocks().next().unwrap();

    assert_eq!(b, a);
    assert_eq!(info.size, 100 - HEADER_SIZE);
    assert_eq!(info.extent, 100);
    assert_eq!(heap.blocks().count(), 2);

    heap.release(Some(b));
    heap.check().unwrap();
  }

  #[test]
  fn test_resize_none_allocates() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.resize(None, 24).unwrap();
    assert_eq!(heap.size_of(a), 24);
    assert_eq!(heap.resize(None, 0), None);
  }

  #[test]
  fn test_resize_to_zero_releases() {
    let mut resized = Heap::new(ArenaRegion::new());
    let mut released = Heap::new(ArenaRegion::new());

    for heap in [&mut resized, &mut released] {
      heap.allocate(10).unwrap();
      heap.allocate(20).unwrap();
      heap.allocate(30).unwrap();
    }

    let target = resized.blocks().nth(1).unwrap().payload;
    assert_eq!(resized.resize(Some(target), 0), None);
    released.release(Some(target));

    assert_eq!(shape(&resized), shape(&released));
    assert_eq!(resized.stats(), released.stats());
  }

  #[test]
  fn test_resize_same_size_is_identity() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(32).unwrap();
    heap.payload_mut(a).fill(3);
    let before = shape(&heap);

    assert_eq!(heap.resize(Some(a), 32), Some(a));
    assert_eq!(shape(&heap), before);
    assert!(heap.payload(a).iter().all(|&b| b == 3));
  }

  #[test]
  fn test_resize_grow_moves_contents() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(16).unwrap();
    let guard = heap.allocate(4).unwrap();
    for (i, byte) in heap.payload_mut(a).iter_mut().enumerate() {
      *byte = i as u8 + 1;
    }

    let b = heap.resize(Some(a), 64).unwrap();

    assert_ne!(b, a);
    assert_eq!(heap.size_of(b), 64);
    assert_eq!(
      &heap.payload(b)[..16],
      (1..=16).collect::<Vec<u8>>().as_slice()
    );
    assert!(heap.payload(b)[16..].iter().all(|&b| b == 0));
    assert!(heap.blocks().next().unwrap().is_free);
    assert_eq!(heap.size_of(guard), 4);
    heap.check().unwrap();
  }

  #[test]
  fn test_resize_grow_failure_keeps_original() {
    let mut heap = Heap::new(ArenaRegion::with_limit(HEADER_SIZE + 16 + HEADER_SIZE + 8));

    let a = heap.allocate(16).unwrap();
    heap.payload_mut(a).copy_from_slice(b"sixteen bytes!!!");
    let before = shape(&heap);

    assert_eq!(heap.resize(Some(a), 32), None);

    assert_eq!(shape(&heap), before);
    assert_eq!(heap.size_of(a), 16);
    assert_eq!(heap.payload(a), b"sixteen bytes!!!");
    heap.check().unwrap();
  }

  #[test]
  fn test_resize_shrink_splits_in_place() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(200).unwrap();
    heap.allocate(8).unwrap();
    heap.payload_mut(a).fill(9);

    assert_eq!(heap.resize(Some(a), 50), Some(a));
    assert_eq!(heap.size_of(a), 50);
    assert!(heap.payload(a).iter().all(|&b| b == 9));
    assert_eq!(
      shape(&heap)[..2],
      [(0, 50, false), (HEADER_SIZE + 50, 200 - 50 - HEADER_SIZE, true)]
    );
    heap.check().unwrap();
  }

  #[test]
  fn test_resize_shrink_merges_trimmed_tail_with_free_neighbour() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(200).unwrap();
    let b = heap.allocate(40).unwrap();
    heap.allocate(8).unwrap();
    heap.release(Some(b));

    heap.resize(Some(a), 50).unwrap();
    heap.check().unwrap();

    let blocks: Vec<_> = heap.blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[1].is_free);
    assert_eq!(blocks[1].extent, 200 - 50 + 40);
  }

  #[test]
  fn test_resize_shrink_with_small_slack_keeps_block() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(40).unwrap();
    assert_eq!(heap.resize(Some(a), 30), Some(a));

    assert_eq!(heap.blocks().count(), 1);
    assert_eq!(heap.size_of(a), 30);

    // growing back within the physical extent still moves the block
    let b = heap.resize(Some(a), 35).unwrap();
    assert_ne!(b, a);
    heap.check().unwrap();
  }

  #[test]
  fn test_invariants_hold_under_churn() {
    let mut heap = Heap::new(ArenaRegion::new());
    let mut live: Vec<(HeapPtr, u8)> = Vec::new();
    let mut seed: u32 = 0x2545_F491;

    let mut next = move || {
      seed ^= seed << 13;
      seed ^= seed >> 17;
      seed ^= seed << 5;
      seed
    };

    for round in 0..2000u32 {
      let roll = next();
      let tag = round as u8;

      match roll % 4 {
        0 | 1 => {
          let size = (next() % 300) as usize;
          if let Some(ptr) = heap.allocate(size) {
            heap.payload_mut(ptr).fill(tag);
            live.push((ptr, tag));
          }
        },
        2 if !live.is_empty() => {
          let (ptr, _) = live.swap_remove(next() as usize % live.len());
          heap.release(Some(ptr));
        },
        _ if !live.is_empty() => {
          let index = next() as usize % live.len();
          let (ptr, old_tag) = live[index];
          let old_size = heap.size_of(ptr);
          let size = (next() % 400) as usize;

          match heap.resize(Some(ptr), size) {
            Some(moved) => {
              let kept = old_size.min(size);
              assert!(heap.payload(moved)[..kept].iter().all(|&b| b == old_tag));
              heap.payload_mut(moved).fill(tag);
              live[index] = (moved, tag);
            },
            None => {
              live.swap_remove(index);
            },
          }
        },
        _ => {},
      }

      heap.check().unwrap();

      let stats = heap.stats();
      assert!(stats.live_bytes <= stats.grown);
      for &(ptr, tag) in &live {
        assert!(heap.payload(ptr).iter().all(|&b| b == tag));
      }
    }
  }

  #[test]
  fn test_reserved_region_backs_a_heap() {
    let mut heap = Heap::new(ReservedRegion::reserve(4096).unwrap());

    let a = heap.allocate(1000).unwrap();
    let b = heap.allocate(1000).unwrap();
    heap.payload_mut(b).fill(1);
    heap.release(Some(a));

    let c = heap.resize(Some(b), 1500).unwrap();
    assert!(heap.payload(c)[..1000].iter().all(|&byte| byte == 1));

    let capacity = heap.region().capacity();
    assert!(heap.allocate(capacity).is_none());
    heap.check().unwrap();
  }

  #[test]
  fn test_check_detects_uncoalesced_neighbours() {
    let mut heap = Heap::new(ArenaRegion::new());

    let a = heap.allocate(10).unwrap();
    let b = heap.allocate(10).unwrap();
    heap.release(Some(a));

    // mark `b` free behind the registry's back
    let mem = heap.region.bytes_mut();
    let mut block = Block::read(mem, b.header());
    block.is_free = true;
    block.write(mem, b.header());

    assert_eq!(
      heap.check(),
      Err(CorruptionError::Uncoalesced {
        first: a.header(),
        second: b.header(),
      })
    );
  }
}
