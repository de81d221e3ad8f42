use log::debug;

use crate::GrowError;

/// A contiguous span of memory that only ever grows at its end.
///
/// This is the heap's growth primitive: the equivalent of moving the program
/// break with `sbrk(2)`. Offsets are relative to the start of the region.
pub trait Region {
  /// Extends the region by `len` bytes.
  ///
  /// Returns the offset at which the new bytes begin, which must equal
  /// [`len`](Region::len) before the call. On failure the region is left
  /// unchanged.
  fn grow(
    &mut self,
    len: usize,
  ) -> Result<usize, GrowError>;

  /// Current end of the region (the break).
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Every byte obtained so far.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];
}

/// A region backed by a growable `Vec<u8>`, optionally capped at a byte limit.
#[derive(Debug, Default)]
pub struct ArenaRegion {
  bytes: Vec<u8>,
  limit: Option<usize>,
}

impl ArenaRegion {
  /// Creates an empty region that grows until memory runs out.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates an empty region that refuses to grow past `limit` bytes.
  pub fn with_limit(limit: usize) -> Self {
    Self {
      bytes: Vec::new(),
      limit: Some(limit),
    }
  }

  pub fn limit(&self) -> Option<usize> {
    self.limit
  }
}

impl Region for ArenaRegion {
  fn grow(
    &mut self,
    len: usize,
  ) -> Result<usize, GrowError> {
    let base = self.bytes.len();
    let end = base
      .checked_add(len)
      .ok_or(GrowError::Overflow { requested: len })?;

    if let Some(limit) = self.limit.filter(|&limit| end > limit) {
      return Err(GrowError::Exhausted {
        requested: len,
        available: limit.saturating_sub(base),
      });
    }

    self.bytes.resize(end, 0);
    debug!("arena grew by {len} bytes, break = {end:#x}");

    Ok(base)
  }

  fn len(&self) -> usize {
    self.bytes.len()
  }

  fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.bytes
  }
}
