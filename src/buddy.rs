//! The buddy allocator itself.
//!
//! ```text
//!   Buddy Allocator Concept (K=15, M=12):
//!
//!   order 15  [................... one block, 32768 bytes ...................]
//!   order 14  [............. 16384 .............][............. 16384 .............]
//!   order 13  [... 8192 ...][... 8192 ...][... 8192 ...][... 8192 ...]
//!   order 12  [4096][4096][4096][4096][4096][4096][4096][4096]
//!
//!   Every node past order M can be in exactly one of two states, and both collapse into a
//!   single bit: "allocated, or split into two children" vs. "free, and not split".
//! ```
//!
//! An allocation request is rounded up to the smallest order `r` that both satisfies `M <= r
//! <= K` and fits the request, a free block of that order is located (splitting a larger one
//! if needed), and the region is grown past the allocated block's end if the current break
//! doesn't already cover it. Freeing clears the block's bit and walks up coalescing with its
//! buddy for as long as the buddy is also free, then shrinks the region back down to the
//! highest-addressed surviving allocation.

use std::io::{self, Write};
use std::ptr;

use log::{debug, info, trace, warn};

use crate::bitmap::Bitmap;
use crate::dump;
use crate::error::{FreeError, InitError};
use crate::header::Header;
use crate::index::{
  bitmap_bytes, left_child, num_blocks, offset_of, order_of, parent, right_child, sibling,
};
use crate::region::Sbrk;

/// A buddy-system allocator over a single contiguous region grown via an injected `Sbrk`
/// primitive.
///
/// `R` is the region-extension backend: [`crate::region::ProcessBreak`] for the real process
/// break, or [`crate::region::SimRegion`] for tests and demos.
pub struct BuddyAllocator<R: Sbrk> {
  header_ptr: *mut Header,
  region: R,
}

impl<R: Sbrk> BuddyAllocator<R> {
  /// Initializes a new allocator at region base `h`, managing blocks from order `m` up to
  /// order `k` (`2^m` is the smallest allocation granularity, `2^k` the whole region).
  ///
  /// Reserves the header and status bitmap from `region` immediately; the returned
  /// allocator's user-visible region starts right after them.
  ///
  /// # Safety
  /// `h` must be the current end of `region` and must remain valid and exclusively owned by
  /// this allocator for as long as it's in use.
  pub unsafe fn init(h: usize, k: u8, m: u8, mut region: R) -> Result<Self, InitError> {
    if k >= 32 {
      return Err(InitError::OrderTooLarge(k));
    }
    if m > k {
      return Err(InitError::MinExceedsInitial { k, m });
    }

    let header_size = Header::layout_size(k, m);
    if region.sbrk(header_size as i32) == -1 {
      return Err(InitError::RegionExtendFailed);
    }

    let header_ptr = Header::write_new(h, k, m);
    (*header_ptr).region_start = h + header_size;
    (*header_ptr).cur_break = h + header_size;

    info!(
      "initialized buddy allocator: k={k} m={m} blocks={} region_start={:#x}",
      num_blocks(k, m),
      h + header_size
    );

    Ok(Self { header_ptr, region })
  }

  /// Allocates a block of at least `size` bytes, returning its start address, or `None` if
  /// the request is zero, exceeds the region's total capacity, or the region failed to grow.
  ///
  /// # Safety
  /// The returned pointer is valid for `1 << order` bytes, where `order` is the smallest
  /// value in `[m, k]` with `2^order >= size`, until it is passed to [`Self::free`] or
  /// [`Self::realloc`].
  pub unsafe fn allocate(&mut self, size: u32) -> Option<*mut u8> {
    if size == 0 {
      warn!("allocate: rejected zero-size request");
      return None;
    }

    let k = self.k();
    let mut r = ceil_log2(size);
    if r > k {
      warn!("allocate: requested order {r} exceeds initial order {k}");
      return None;
    }
    let m = self.m();
    if r < m {
      r = m;
    }

    let blk = self.find_fit(r);
    if blk == 0 && self.bitmap().test(0) {
      warn!("allocate: no block of order {r} available");
      return None;
    }

    let blk = self.split(blk, r);
    let s = self.s();
    let off = offset_of(k, blk) as usize;
    let ptr = s + off;
    let end = ptr + (1usize << r);

    let cur_break = self.header().cur_break;
    if end > cur_break {
      let delta = (end - cur_break) as i32;
      if self.region.sbrk(delta) == -1 {
        warn!("allocate: region extend by {delta} bytes failed, rolling back");
        self.free_block(blk);
        return None;
      }
      self.header_mut().cur_break = end;
      self.header_mut().last_used_block = blk;
      info!("region grew to {:#x} (delta {delta})", end);
    }

    trace!("allocated block {blk} (order {r}) at {:#x}", ptr);
    Some(ptr as *mut u8)
  }

  /// Frees a block previously returned by [`Self::allocate`] or [`Self::realloc`].
  ///
  /// # Safety
  /// `ptr` must either be null or a pointer previously returned by this allocator and not
  /// already freed.
  pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<(), FreeError> {
    if ptr.is_null() {
      warn!("free: rejected null pointer");
      return Err(FreeError::NullPointer);
    }

    let blk = match self.block_at(ptr as usize) {
      Some(b) => b,
      None => {
        warn!("free: pointer {:?} does not resolve to a block", ptr);
        return Err(FreeError::NotAllocated);
      }
    };

    if !self.bitmap().test(blk) {
      warn!("free: block {blk} is already free");
      return Err(FreeError::NotAllocated);
    }

    self.free_block(blk);
    Ok(())
  }

  /// Resizes a block in place where possible, otherwise allocates a new block, copies the
  /// overlapping prefix, and frees the old one.
  ///
  /// `realloc(null, size)` behaves like `allocate(size)`; `realloc(ptr, 0)` behaves like
  /// `free(ptr)` and returns `None`.
  ///
  /// # Safety
  /// Same obligations as [`Self::allocate`] and [`Self::free`] combined; `ptr` must be null
  /// or a live allocation from this allocator.
  pub unsafe fn realloc(&mut self, ptr: *mut u8, size: u32) -> Option<*mut u8> {
    if ptr.is_null() {
      return self.allocate(size);
    }
    if size == 0 {
      let _ = self.free(ptr);
      return None;
    }

    let k = self.k();
    let mut r = ceil_log2(size);
    if r > k {
      warn!("realloc: requested order {r} exceeds initial order {k}");
      return None;
    }
    let m = self.m();
    if r < m {
      r = m;
    }

    let blk = self.block_at(ptr as usize)?;
    let old_order = order_of(k, blk);

    if r == old_order {
      return Some(ptr);
    }

    if r < old_order {
      self.split(blk, r);
      trace!("realloc: shrank block {blk} in place to order {r}");
      return Some(ptr);
    }

    let old_size = 1u32 << old_order;

    // Defer any shrink the free triggers: the bytes at `ptr` must survive until the copy,
    // and the region must not shrink out from under a same-address grow.
    self.header_mut().allow_shrink = 0;
    self.header_mut().has_deferred_break = 0;

    if self.free(ptr).is_err() {
      self.header_mut().allow_shrink = 1;
      return None;
    }

    match self.allocate(size) {
      Some(new_ptr) => {
        if new_ptr as usize != ptr as usize {
          ptr::copy_nonoverlapping(ptr, new_ptr, old_size as usize);
        }
        self.apply_deferred_shrink();
        self.header_mut().allow_shrink = 1;
        Some(new_ptr)
      }
      None => {
        let recovered = self.allocate(old_size);
        debug_assert_eq!(
          recovered,
          Some(ptr),
          "freeing then reallocating the same order must return the same block"
        );
        self.apply_deferred_shrink();
        self.header_mut().allow_shrink = 1;
        None
      }
    }
  }

  /// Writes one `allocated <n>` or `free <n>` line per leaf block to `out`, in ascending
  /// address order.
  pub fn dump_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
    dump::walk(&self.bitmap(), 0, self.k(), self.header().num_blocks, out)
  }

  /// Dumps to stdout.
  pub fn dump(&self) {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let _ = self.dump_to(&mut lock);
  }

  /// Current region break, as an absolute address.
  pub fn watermark(&self) -> usize {
    self.header().cur_break
  }

  /// Start of the user-addressable region, just past the header and bitmap.
  pub fn region_start(&self) -> usize {
    self.s()
  }

  // --- internals ---

  fn header(&self) -> &Header {
    unsafe { &*self.header_ptr }
  }

  fn header_mut(&mut self) -> &mut Header {
    unsafe { &mut *self.header_ptr }
  }

  fn k(&self) -> u8 {
    self.header().k
  }

  fn m(&self) -> u8 {
    self.header().m
  }

  fn s(&self) -> usize {
    self.header().region_start
  }

  fn bitmap(&self) -> Bitmap {
    unsafe {
      let ptr = Header::bitmap_ptr(self.header_ptr);
      Bitmap::from_raw(ptr, bitmap_bytes(self.k(), self.m()))
    }
  }

  /// Locates a free, unsplit block of order `r`, splitting a larger free block down to it
  /// if none exists directly. Returns `0` (the root) if the whole region is exhausted.
  fn find_fit(&self, r: u8) -> u32 {
    let k = self.k();
    let start = (1u32 << (k - r)) - 1;
    let end = start << 1;

    let bitmap = self.bitmap();
    let mut i = start;
    while i < end {
      let a = bitmap.test(i);
      let b = bitmap.test(i + 1);
      if a != b {
        let found = if !a { i } else { i + 1 };
        debug!("find_fit: hit at order {r}, block {found}");
        return found;
      }
      i += 2;
    }

    if r < k {
      debug!("find_fit: no pair free at order {r}, escalating to order {}", r + 1);
      self.find_fit(r + 1)
    } else {
      0
    }
  }

  /// Descends `blk` left, marking every node along the way, until it reaches order `r`.
  /// Returns the resulting order-`r` block index.
  fn split(&mut self, blk: u32, r: u8) -> u32 {
    let k = self.k();
    let o = order_of(k, blk);
    let mut b = blk;
    let mut bitmap = self.bitmap();
    bitmap.set(b);
    trace!("split: set block {b} (order {o})");
    for order in (r..o).rev() {
      b = left_child(b);
      bitmap.set(b);
      trace!("split: set block {b} (order {order})");
    }
    b
  }

  /// Resolves an address back to the smallest live block containing it.
  fn block_at(&self, addr: usize) -> Option<u32> {
    let s = self.s();
    if addr < s {
      return None;
    }
    let k = self.k();
    let m = self.m();
    let offset = addr - s;
    if offset > (1usize << k) || offset % (1usize << m) != 0 {
      return None;
    }

    let mut blk = 0u32;
    let mut size = 1usize << k;
    let mut remaining = offset;
    while remaining > 0 {
      size >>= 1;
      if remaining >= size {
        blk = right_child(blk);
        remaining -= size;
      } else {
        blk = left_child(blk);
      }
    }

    let bitmap = self.bitmap();
    let n = self.header().num_blocks;
    let mut left = left_child(blk);
    while left < n && bitmap.test(left) {
      blk = left;
      left = left_child(blk);
    }

    Some(blk)
  }

  /// Clears `blk`'s bit, coalesces upward while its buddy is also free, recomputes the
  /// watermark, and shrinks the region (immediately, or deferred while a realloc is mid
  /// flight).
  fn free_block(&mut self, blk: u32) {
    let mut bitmap = self.bitmap();
    bitmap.clear(blk);
    trace!("freed block {blk}");

    let mut b = blk;
    while b > 0 {
      let buddy = sibling(b);
      if bitmap.test(buddy) {
        break;
      }
      b = parent(b);
      bitmap.clear(b);
      trace!("coalesced up to block {b}");
    }

    let last = self.recompute_last_used_block();
    self.header_mut().last_used_block = last;

    let k = self.k();
    let n = self.header().num_blocks;
    let s = self.s();
    let end = if last == n {
      s
    } else {
      s + offset_of(k, last) as usize + (1usize << order_of(k, last))
    };

    let cur_break = self.header().cur_break;
    if end < cur_break {
      if self.header().allow_shrink == 1 {
        let delta = (end as isize - cur_break as isize) as i32;
        self.region.sbrk(delta);
        self.header_mut().cur_break = end;
        info!("region shrank to {:#x} (delta {delta})", end);
      } else {
        self.header_mut().has_deferred_break = 1;
        self.header_mut().deferred_break = end;
        debug!("deferred shrink to {:#x}", end);
      }
    }
  }

  fn apply_deferred_shrink(&mut self) {
    if self.header().has_deferred_break != 1 {
      return;
    }
    let target = self.header().deferred_break;
    let cur = self.header().cur_break;
    let delta = (target as isize - cur as isize) as i32;
    self.region.sbrk(delta);
    self.header_mut().cur_break = target;
    self.header_mut().has_deferred_break = 0;
    debug!("applied deferred shrink to {:#x}", target);
  }

  /// Recomputes the watermark block from scratch: the rightmost (highest-addressed)
  /// allocated leaf in the tree, found by a bounded root-to-leaf descent that always
  /// prefers the right child first.
  fn recompute_last_used_block(&self) -> u32 {
    let k = self.k();
    match self.rightmost_occupied(0, k) {
      Some((blk, _)) => blk,
      None => self.header().num_blocks,
    }
  }

  fn rightmost_occupied(&self, node: u32, order: u8) -> Option<(u32, u8)> {
    let bitmap = self.bitmap();
    if order == self.m() {
      return if bitmap.test(node) { Some((node, order)) } else { None };
    }

    let left = left_child(node);
    let right = right_child(node);
    if !bitmap.test(left) && !bitmap.test(right) {
      return if bitmap.test(node) { Some((node, order)) } else { None };
    }

    if let Some(found) = self.rightmost_occupied(right, order - 1) {
      return Some(found);
    }
    self.rightmost_occupied(left, order - 1)
  }
}

/// Smallest `i` such that `n <= 2^i`. Zero rounds up to order zero.
fn ceil_log2(n: u32) -> u8 {
  if n <= 1 {
    return 0;
  }
  32 - (n - 1).leading_zeros() as u8
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::SimRegion;

  fn fresh(k: u8, m: u8) -> BuddyAllocator<SimRegion> {
    let region = SimRegion::new(1 << (k + 1));
    let h = region.base();
    unsafe { BuddyAllocator::init(h, k, m, region).unwrap() }
  }

  fn dump_lines<R: Sbrk>(a: &BuddyAllocator<R>) -> String {
    let mut buf = Vec::new();
    a.dump_to(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
  }

  #[test]
  fn init_rejects_bad_orders() {
    let region = SimRegion::new(1 << 16);
    let h = region.base();
    assert!(matches!(
      unsafe { BuddyAllocator::init(h, 12, 15, region) },
      Err(InitError::MinExceedsInitial { k: 12, m: 15 })
    ));

    let region = SimRegion::new(1 << 16);
    let h = region.base();
    assert!(matches!(
      unsafe { BuddyAllocator::init(h, 32, 0, region) },
      Err(InitError::OrderTooLarge(32))
    ));
  }

  #[test]
  fn single_allocation_splits_down_the_left_spine() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.allocate(8000) }.unwrap();
    assert_eq!(ptr as usize, a.region_start());
    assert_eq!(
      dump_lines(&a),
      "allocated 8192\nfree 8192\nfree 16384\n"
    );
  }

  #[test]
  fn second_same_size_allocation_takes_the_freed_buddy_slot() {
    let mut a = fresh(15, 12);
    unsafe { a.allocate(8000) }.unwrap();
    unsafe { a.allocate(8000) }.unwrap();
    assert_eq!(
      dump_lines(&a),
      "allocated 8192\nallocated 8192\nfree 16384\n"
    );
  }

  #[test]
  fn third_same_size_allocation_splits_the_remaining_half() {
    let mut a = fresh(15, 12);
    unsafe { a.allocate(8000) }.unwrap();
    unsafe { a.allocate(8000) }.unwrap();
    unsafe { a.allocate(8000) }.unwrap();
    assert_eq!(
      dump_lines(&a),
      "allocated 8192\nallocated 8192\nallocated 8192\nfree 8192\n"
    );
  }

  #[test]
  fn freeing_a_block_coalesces_with_a_free_buddy() {
    let mut a = fresh(15, 12);
    let first = unsafe { a.allocate(8000) }.unwrap();
    unsafe { a.allocate(10000) }.unwrap();
    unsafe { a.free(first) }.unwrap();
    // first's buddy was never allocated, so the pair coalesces back into one free
    // 16384-byte block; the second allocation still occupies the other half.
    assert_eq!(dump_lines(&a), "free 16384\nallocated 16384\n");
  }

  #[test]
  fn freeing_everything_returns_watermark_to_region_start() {
    let mut a = fresh(15, 12);
    let first = unsafe { a.allocate(8000) }.unwrap();
    let second = unsafe { a.allocate(10000) }.unwrap();
    unsafe { a.free(first) }.unwrap();
    unsafe { a.free(second) }.unwrap();
    assert_eq!(a.watermark(), a.region_start());
    assert_eq!(dump_lines(&a), "free 32768\n");
  }

  #[test]
  fn exact_region_size_allocation_succeeds_once() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.allocate(1 << 15) }.unwrap();
    assert_eq!(ptr as usize, a.region_start());
    assert!(unsafe { a.allocate(1) }.is_none());
  }

  #[test]
  fn oversized_allocation_is_rejected() {
    let mut a = fresh(15, 12);
    assert!(unsafe { a.allocate((1 << 15) + 1) }.is_none());
  }

  #[test]
  fn zero_size_allocation_is_rejected() {
    let mut a = fresh(15, 12);
    assert!(unsafe { a.allocate(0) }.is_none());
  }

  #[test]
  fn freeing_null_is_an_error() {
    let mut a = fresh(15, 12);
    assert!(matches!(
      unsafe { a.free(ptr::null_mut()) },
      Err(FreeError::NullPointer)
    ));
  }

  #[test]
  fn double_free_is_an_error() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.allocate(8000) }.unwrap();
    unsafe { a.free(ptr) }.unwrap();
    assert!(matches!(unsafe { a.free(ptr) }, Err(FreeError::NotAllocated)));
  }

  #[test]
  fn realloc_grows_and_preserves_content() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.allocate(100) }.unwrap();
    unsafe { *ptr = 0x42 };
    let grown = unsafe { a.realloc(ptr, 9000) }.unwrap();
    assert_eq!(unsafe { *grown }, 0x42);
  }

  #[test]
  fn realloc_shrinks_in_place() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.allocate(9000) }.unwrap();
    let shrunk = unsafe { a.realloc(ptr, 100) }.unwrap();
    assert_eq!(shrunk, ptr);
  }

  #[test]
  fn realloc_with_null_behaves_like_allocate() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.realloc(ptr::null_mut(), 8000) }.unwrap();
    assert_eq!(ptr as usize, a.region_start());
  }

  #[test]
  fn realloc_to_zero_frees_and_returns_none() {
    let mut a = fresh(15, 12);
    let ptr = unsafe { a.allocate(8000) }.unwrap();
    assert!(unsafe { a.realloc(ptr, 0) }.is_none());
    assert!(matches!(unsafe { a.free(ptr) }, Err(FreeError::NotAllocated)));
  }

  /// After every operation in a random sequence, the watermark must sit exactly at the end
  /// of the highest-addressed live allocation (or at `region_start` if none remain), and
  /// every surviving pointer must still round-trip through `block_at`.
  proptest::proptest! {
    #[test]
    fn watermark_tracks_the_highest_live_allocation(
      ops in proptest::collection::vec(0u32..20000, 1..40)
    ) {
      let mut a = fresh(15, 12);
      let mut live: Vec<*mut u8> = Vec::new();

      for size in ops {
        if size % 5 == 0 && !live.is_empty() {
          let idx = (size as usize) % live.len();
          let ptr = live.remove(idx);
          unsafe { a.free(ptr) }.unwrap();
        } else if let Some(ptr) = unsafe { a.allocate(size.max(1)) } {
          live.push(ptr);
        }

        let expected = if live.is_empty() {
          a.region_start()
        } else {
          let max_end = live
            .iter()
            .map(|&p| {
              let blk = a.block_at(p as usize).unwrap();
              let k = a.k();
              a.s() + offset_of(k, blk) as usize + (1usize << order_of(k, blk))
            })
            .max()
            .unwrap();
          max_end
        };

        proptest::prop_assert_eq!(a.watermark(), expected);
      }
    }
  }
}
