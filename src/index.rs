//! Pure index arithmetic over the complete binary tree of blocks.
//!
//! The tree is stored in heap order: the root is index 0, a node's children are `2i+1` and
//! `2i+2`, and its parent is `(i-1)/2`. Every function here is a closed-form computation over
//! that layout; none of them touch the bitmap or the header.

pub(crate) fn is_left(i: u32) -> bool {
  i % 2 == 1
}

pub(crate) fn parent(i: u32) -> u32 {
  (i - 1) / 2
}

pub(crate) fn left_child(i: u32) -> u32 {
  2 * i + 1
}

pub(crate) fn right_child(i: u32) -> u32 {
  2 * i + 2
}

pub(crate) fn sibling(i: u32) -> u32 {
  if is_left(i) { i + 1 } else { i - 1 }
}

/// The order (`log2` of its size) of block `i` in a tree whose root has order `k`.
pub(crate) fn order_of(k: u8, i: u32) -> u8 {
  let mut depth = 0u8;
  let mut node = i;
  while node > 0 {
    node = parent(node);
    depth += 1;
  }
  k - depth
}

/// Byte offset of block `i` from the region's user-data start, for a tree with root order `k`.
pub(crate) fn offset_of(k: u8, i: u32) -> u64 {
  let mut offset = 0u64;
  let mut size = 1u64 << order_of(k, i);
  let mut node = i;
  while node > 0 {
    if !is_left(node) {
      offset += size;
    }
    node = parent(node);
    size <<= 1;
  }
  offset
}

/// Number of nodes in a complete tree spanning orders `m..=k`.
pub(crate) fn num_blocks(k: u8, m: u8) -> u32 {
  ((1u64 << (k - m + 1)) - 1) as u32
}

/// Size in bytes of the status bitmap covering `num_blocks(k, m)` nodes, one bit each.
pub(crate) fn bitmap_bytes(k: u8, m: u8) -> usize {
  let n = num_blocks(k, m) as u64;
  (n.div_ceil(8) + 1) as usize
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn order_and_offset_of_root() {
    assert_eq!(order_of(15, 0), 15);
    assert_eq!(offset_of(15, 0), 0);
  }

  #[test]
  fn order_and_offset_match_hand_derivation() {
    // K=15, M=12: root(15,0)=0, A(14,0)=1, B(14,16384)=2, C(13,0)=3, D(13,8192)=4.
    assert_eq!(order_of(15, 1), 14);
    assert_eq!(offset_of(15, 1), 0);
    assert_eq!(order_of(15, 2), 14);
    assert_eq!(offset_of(15, 2), 16384);
    assert_eq!(order_of(15, 3), 13);
    assert_eq!(offset_of(15, 3), 0);
    assert_eq!(order_of(15, 4), 13);
    assert_eq!(offset_of(15, 4), 8192);
  }

  #[test]
  fn parent_child_sibling_are_consistent() {
    for i in 1u32..100 {
      assert_eq!(parent(left_child(i)), i);
      assert_eq!(parent(right_child(i)), i);
      assert_eq!(sibling(sibling(i)), i);
    }
  }

  #[test]
  fn num_blocks_matches_full_tree_count() {
    assert_eq!(num_blocks(15, 12), 15);
    assert_eq!(num_blocks(31, 0), u32::MAX);
  }

  #[test]
  fn bitmap_bytes_is_never_zero() {
    assert!(bitmap_bytes(12, 12) > 0);
    assert!(bitmap_bytes(31, 0) > 0);
  }
}
