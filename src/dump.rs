//! Recursive in-order dump of the block tree.

use std::io::{self, Write};

use crate::bitmap::Bitmap;
use crate::index::{left_child, right_child};

/// Writes one `allocated <n>` or `free <n>` line per leaf block, left to right, i.e. in
/// ascending address order.
pub(crate) fn walk<W: Write>(
  bitmap: &Bitmap,
  node: u32,
  order: u8,
  num_blocks: u32,
  out: &mut W,
) -> io::Result<()> {
  let left = left_child(node);
  let right = right_child(node);
  let split = left < num_blocks && (bitmap.test(left) || bitmap.test(right));

  if split {
    walk(bitmap, left, order - 1, num_blocks, out)?;
    walk(bitmap, right, order - 1, num_blocks, out)?;
  } else if bitmap.test(node) {
    writeln!(out, "allocated {}", 1u64 << order)?;
  } else {
    writeln!(out, "free {}", 1u64 << order)?;
  }

  Ok(())
}
