//! # buddy_alloc - A Buddy-System Memory Allocator Library
//!
//! This crate manages a single contiguous region of memory using the **buddy system**: the
//! region is treated as a complete binary tree of power-of-two blocks, split on demand and
//! eagerly coalesced back together on free.
//!
//! ## Overview
//!
//! ```text
//!   Buddy Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         MANAGED REGION                               │
//!   │                                                                      │
//!   │   ┌───────────┬───────────────────────┬─────────────────────────┐   │
//!   │   │ header +  │      allocated         │          free           │   │
//!   │   │  bitmap   │       blocks           │         blocks          │   │
//!   │   └───────────┴───────────────────────┴─────────────────────────┘   │
//!   │   H                                                                 B │
//!   │               ▲ region start (S)                     cur break ▲     │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   A request for `size` bytes is rounded up to the smallest order `r` with `2^r >= size`
//!   (clamped to the minimum order `M`), a free block of that order is located by splitting a
//!   larger one if needed, and the region is grown past it if the current break doesn't
//!   already cover it. Freeing clears the block and walks up merging free buddy pairs back
//!   into their parent for as long as possible, then shrinks the region back down.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   buddy_alloc
//!   ├── align      - Alignment macro
//!   ├── error      - Typed setup/teardown errors
//!   ├── region     - Injected region-extension primitive (Sbrk), its backends, and a
//!   │                config type for picking one at runtime
//!   ├── bitmap     - One-bit-per-node status bitmap
//!   ├── index      - Pure index arithmetic over the block tree
//!   ├── header     - Persisted allocator state
//!   ├── buddy      - BuddyAllocator implementation
//!   └── dump       - Recursive tree-dump walk
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use buddy_alloc::buddy::BuddyAllocator;
//! use buddy_alloc::region::SimRegion;
//!
//! let region = SimRegion::new(1 << 20);
//! let h = region.base();
//! let mut allocator = unsafe { BuddyAllocator::init(h, 15, 12, region) }.unwrap();
//!
//! let ptr = unsafe { allocator.allocate(8000) }.unwrap();
//! unsafe { allocator.free(ptr) }.unwrap();
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives.
//! - **Power-of-two granularity**: every allocation rounds up to `2^order` bytes.
//! - **Unix-only real backend**: `ProcessBreak` requires `libc::sbrk` (POSIX systems); the
//!   `SimRegion` backend has no such requirement.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management. All allocation,
//! deallocation and resizing operations require `unsafe` blocks.

pub mod align;
pub mod buddy;
pub mod dump;
pub mod error;
pub mod region;

mod bitmap;
mod header;
mod index;

pub use buddy::BuddyAllocator;
pub use error::{FreeError, InitError};
pub use region::{ProcessBreak, RegionBacking, Sbrk, SimRegion};
