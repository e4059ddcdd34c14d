//! Typed error surface for allocator setup and teardown.
//!
//! The original bump allocator reports failure with a bare null pointer; a buddy allocator
//! has enough distinct misconfiguration and misuse cases to warrant an enum per operation.

/// Failure reason returned by [`crate::buddy::BuddyAllocator::init`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
  #[error("minimum order {m} must not exceed initial order {k}")]
  MinExceedsInitial { k: u8, m: u8 },

  #[error("initial order {0} must be less than 32")]
  OrderTooLarge(u8),

  #[error("region primitive failed to reserve the header and bitmap")]
  RegionExtendFailed,
}

/// Failure reason returned by [`crate::buddy::BuddyAllocator::free`].
#[derive(Debug, thiserror::Error)]
pub enum FreeError {
  #[error("cannot free a null pointer")]
  NullPointer,

  #[error("pointer does not refer to a live allocation")]
  NotAllocated,
}
