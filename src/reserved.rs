use std::{io, ptr, slice};

use libc::{
  MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE,
  c_void, mmap, munmap, sysconf,
};
use log::debug;

use crate::{GrowError, Region};

const FALLBACK_PAGE_SIZE: usize = 4096;

fn page_size() -> usize {
  let size = unsafe { sysconf(_SC_PAGESIZE) };

  match usize::try_from(size) {
    Ok(size) if size.is_power_of_two() => size,
    _ => FALLBACK_PAGE_SIZE,
  }
}

/// A private program break inside a span of reserved address space.
///
/// ```text
///   base                          break                    base + capacity
///   ┌──────────────────────────────┬───────────────────────────────┐
///   │   grown (owned by the heap)  │   reserved, not yet handed out│
///   └──────────────────────────────┴───────────────────────────────┘
/// ```
///
/// The whole span is mapped up front with `MAP_NORESERVE`, so pages are only
/// backed once touched. Growing moves the break forward the way `sbrk` moves
/// the real one, but nothing else in the process can move this break, so the
/// grown bytes always stay contiguous.
#[derive(Debug)]
pub struct ReservedRegion {
  base: *mut u8,
  capacity: usize,
  brk: usize,
}

// The mapping is owned exclusively by this value.
unsafe impl Send for ReservedRegion {}

impl ReservedRegion {
  /// Reserves at least `capacity` bytes, rounded up to whole pages.
  pub fn reserve(capacity: usize) -> Result<Self, GrowError> {
    let page = page_size();
    let wanted = capacity.max(1);

    if wanted > usize::MAX - (page - 1) {
      return Err(GrowError::Overflow {
        requested: capacity,
      });
    }

    let capacity = crate::align_to!(wanted, page);

    let base = unsafe {
      mmap(
        ptr::null_mut(),
        capacity,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
      )
    };

    if base == MAP_FAILED {
      return Err(GrowError::Reserve {
        capacity,
        source: io::Error::last_os_error(),
      });
    }

    debug!("reserved {capacity} bytes at {base:?}");

    Ok(Self {
      base: base.cast(),
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Address of the first byte of the region.
  pub fn base(&self) -> *const u8 {
    self.base
  }
}

impl Region for ReservedRegion {
  fn grow(
    &mut self,
    len: usize,
  ) -> Result<usize, GrowError> {
    let base = self.brk;
    let end = base
      .checked_add(len)
      .ok_or(GrowError::Overflow { requested: len })?;

    if end > self.capacity {
      return Err(GrowError::Exhausted {
        requested: len,
        available: self.capacity - base,
      });
    }

    self.brk = end;
    debug!("break moved by {len} bytes to {:?}", self.base.wrapping_add(end));

    Ok(base)
  }

  fn len(&self) -> usize {
    self.brk
  }

  fn bytes(&self) -> &[u8] {
    // [base, base + brk) lies inside the live mapping.
    unsafe { slice::from_raw_parts(self.base, self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.base, self.brk) }
  }
}

impl Drop for ReservedRegion {
  fn drop(&mut self) {
    unsafe {
      munmap(self.base.cast::<c_void>(), self.capacity);
    }
  }
}
