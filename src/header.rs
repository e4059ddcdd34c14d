//! The allocator's persisted state, written directly into the managed region at `H`.
//!
//! Mirrors the original `heap_t` struct: rather than keeping bookkeeping off to the side, the
//! header lives at the very start of the region it describes, immediately followed by the
//! status bitmap.

use std::mem;

use crate::index::{bitmap_bytes, num_blocks};

#[repr(C)]
pub(crate) struct Header {
  pub k: u8,
  pub m: u8,
  pub allow_shrink: u8,
  pub has_deferred_break: u8,
  pub num_blocks: u32,
  pub last_used_block: u32,
  _reserved: u32,
  pub cur_break: usize,
  pub deferred_break: usize,
  pub region_start: usize,
}

impl Header {
  /// Total bytes the header plus its trailing bitmap occupy, word-aligned so the user
  /// region that follows starts on an aligned boundary.
  pub(crate) fn layout_size(k: u8, m: u8) -> usize {
    crate::align!(mem::size_of::<Header>() + bitmap_bytes(k, m))
  }

  /// # Safety
  /// `h` must point to at least `layout_size(k, m)` writable bytes.
  pub(crate) unsafe fn write_new(h: usize, k: u8, m: u8) -> *mut Header {
    let header_ptr = h as *mut Header;
    let n = num_blocks(k, m);
    (*header_ptr).k = k;
    (*header_ptr).m = m;
    (*header_ptr).allow_shrink = 1;
    (*header_ptr).has_deferred_break = 0;
    (*header_ptr).num_blocks = n;
    (*header_ptr).last_used_block = n;
    (*header_ptr).cur_break = 0;
    (*header_ptr).deferred_break = 0;
    (*header_ptr).region_start = 0;

    let bitmap_ptr = (h + mem::size_of::<Header>()) as *mut u8;
    std::ptr::write_bytes(bitmap_ptr, 0, bitmap_bytes(k, m));

    header_ptr
  }

  pub(crate) fn bitmap_ptr(header_ptr: *mut Header) -> *mut u8 {
    (header_ptr as usize + mem::size_of::<Header>()) as *mut u8
  }
}
