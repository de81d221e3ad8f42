use std::mem;

const WORD: usize = mem::size_of::<usize>();

/// Bytes occupied by a block header in front of every payload.
pub const HEADER_SIZE: usize = 4 * WORD;

/// Stored in place of an absent `next`/`prev` link.
const NIL: usize = usize::MAX;

/// A block header as it is laid out in the region.
///
/// Four native-endian words: `size`, `is_free`, `next`, `prev`. Links are
/// header offsets from the region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
  pub size: usize,
  pub is_free: bool,
  pub next: Option<usize>,
  pub prev: Option<usize>,
}

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    next: Option<usize>,
    prev: Option<usize>,
  ) -> Self {
    Self {
      size,
      is_free,
      next,
      prev,
    }
  }

  /// Decodes the header stored at `at`.
  ///
  /// Panics if the header does not lie within `mem`.
  pub fn read(
    mem: &[u8],
    at: usize,
  ) -> Self {
    let header = &mem[at..at + HEADER_SIZE];
    let word = |i: usize| {
      let mut buf = [0u8; WORD];
      buf.copy_from_slice(&header[i * WORD..(i + 1) * WORD]);
      usize::from_ne_bytes(buf)
    };
    let link = |raw: usize| (raw != NIL).then_some(raw);

    Self {
      size: word(0),
      is_free: word(1) != 0,
      next: link(word(2)),
      prev: link(word(3)),
    }
  }

  /// Encodes this header at `at`.
  pub fn write(
    &self,
    mem: &mut [u8],
    at: usize,
  ) {
    let words = [
      self.size,
      usize::from(self.is_free),
      self.next.unwrap_or(NIL),
      self.prev.unwrap_or(NIL),
    ];
    let header = &mut mem[at..at + HEADER_SIZE];

    for (chunk, word) in header.chunks_exact_mut(WORD).zip(words) {
      chunk.copy_from_slice(&word.to_ne_bytes());
    }
  }
}
