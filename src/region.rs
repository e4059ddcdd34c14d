//! The injected region-extension primitive.
//!
//! The allocator never calls `sbrk` directly; every growth or shrink goes through this trait
//! so the same allocator code runs against the real process break or an in-memory simulated
//! region in tests and demos.

/// Extends or shrinks the managed region by `delta` bytes, mirroring the signed 32-bit
/// `sbrk`-style contract: returns the previous end address on success, `-1` on failure.
pub trait Sbrk {
  fn sbrk(&mut self, delta: i32) -> isize;
}

/// Backs the region with the real process break via `libc::sbrk`.
pub struct ProcessBreak;

impl ProcessBreak {
  /// Current process break, without moving it.
  pub fn current_break() -> usize {
    unsafe { libc::sbrk(0) as usize }
  }
}

impl Sbrk for ProcessBreak {
  fn sbrk(&mut self, delta: i32) -> isize {
    unsafe { libc::sbrk(delta as libc::intptr_t) as isize }
  }
}

/// An in-memory region backed by an owned buffer, for deterministic tests and demos.
///
/// The buffer's full capacity is reserved up front; `sbrk` only moves the logical end within
/// it, never reallocates, so addresses handed out stay valid for the region's lifetime.
pub struct SimRegion {
  buffer: Box<[u8]>,
  base: usize,
  end: usize,
}

impl SimRegion {
  pub fn new(capacity: usize) -> Self {
    let mut buffer = vec![0u8; capacity].into_boxed_slice();
    let base = buffer.as_mut_ptr() as usize;
    Self { buffer, base, end: base }
  }

  /// Base address of the backing buffer, suitable as the `h` argument to `init`.
  pub fn base(&self) -> usize {
    self.base
  }

  pub fn capacity(&self) -> usize {
    self.buffer.len()
  }
}

impl Sbrk for SimRegion {
  fn sbrk(&mut self, delta: i32) -> isize {
    let prev = self.end;
    let new_end = if delta >= 0 {
      prev.checked_add(delta as usize)
    } else {
      prev.checked_sub((-delta) as usize)
    };

    match new_end {
      Some(end) if end >= self.base && end <= self.base + self.buffer.len() => {
        self.end = end;
        prev as isize
      }
      _ => -1,
    }
  }
}

impl Sbrk for Box<dyn Sbrk> {
  fn sbrk(&mut self, delta: i32) -> isize {
    (**self).sbrk(delta)
  }
}

/// Selects which [`Sbrk`] backend a caller wants without naming a concrete type.
///
/// [`BuddyAllocator`](crate::buddy::BuddyAllocator) stays generic over `R: Sbrk` for callers who
/// already know their backend; `RegionBacking` is for the ones who instead have a runtime
/// choice (a config flag, a CLI switch) and want to resolve it to a boxed [`Sbrk`] once.
pub enum RegionBacking {
  /// The real process break, via `libc::sbrk`.
  Process,
  /// An in-memory region of the given capacity, for tests and demos.
  Simulated { capacity: usize },
}

impl RegionBacking {
  /// Resolves this choice to a concrete, type-erased region, along with the base address to
  /// pass as `h` to [`crate::buddy::BuddyAllocator::init`].
  pub fn resolve(self) -> (usize, Box<dyn Sbrk>) {
    match self {
      RegionBacking::Process => {
        let base = ProcessBreak::current_break();
        (base, Box::new(ProcessBreak))
      }
      RegionBacking::Simulated { capacity } => {
        let region = SimRegion::new(capacity);
        let base = region.base();
        (base, Box::new(region))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grows_and_shrinks_within_capacity() {
    let mut region = SimRegion::new(1 << 16);
    let base = region.base();

    assert_eq!(region.sbrk(4096), base as isize);
    assert_eq!(region.end, base + 4096);

    assert_eq!(region.sbrk(-2048), (base + 4096) as isize);
    assert_eq!(region.end, base + 2048);
  }

  #[test]
  fn rejects_growth_past_capacity() {
    let mut region = SimRegion::new(4096);
    assert_eq!(region.sbrk(8192), -1);
  }

  #[test]
  fn rejects_shrink_past_base() {
    let mut region = SimRegion::new(4096);
    assert_eq!(region.sbrk(-1), -1);
  }

  #[test]
  fn simulated_backing_resolves_to_a_usable_region() {
    let (base, mut region) = RegionBacking::Simulated { capacity: 4096 }.resolve();
    assert_eq!(region.sbrk(0), base as isize);
    assert_eq!(region.sbrk(1024), base as isize);
  }
}
