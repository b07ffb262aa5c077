//! A binary-buddy allocator over a simulated unit space.
//!
//! The allocator manages `2^max_order` units, handing out power-of-two blocks
//! by splitting larger free blocks on demand and merging freed blocks with
//! their buddies as far up as possible. No memory is actually mapped; blocks
//! are plain `(start, order)` values.
//!
//! ```
//! use buddy_sim::BuddyAllocator;
//!
//! let mut buddy = BuddyAllocator::new(64);
//!
//! let a = buddy.allocate(7).unwrap();
//! assert_eq!((a.block.start(), a.block.size()), (0, 8));
//! assert_eq!(a.splits.len(), 3);
//!
//! let b = buddy.allocate(8).unwrap();
//! assert_eq!(b.block.start(), 8);
//!
//! // The buddy of block 0 is still allocated, so nothing merges.
//! let freed = buddy.free(0).unwrap();
//! assert!(freed.merges.is_empty());
//! ```

#![doc(html_root_url = "https://docs.rs/buddy_sim/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use core::fmt;

// No-op stand-ins for the `log` macros when the feature is disabled.
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

pub mod block;
pub mod buddy;
pub mod render;


pub use crate::{
    block::{order_for, Block},
    buddy::{
        Allocation, BlockState, BuddyAllocator, BuddyStats, Deallocation, Merge, Region,
    },
    render::Strip,
};

/// The error type for allocator constructors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// The requested total size is impossible to satisfy.
    ///
    /// This variant is returned when the size is zero, or when rounding it up
    /// to a power of two would overflow a `usize`. The variant contains the
    /// rejected size.
    InvalidSize(usize),
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::InvalidSize(size) => write!(f, "invalid allocator size {size}"),
        }
    }
}

/// The error type for [`BuddyAllocator::allocate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The request was zero units, or larger than the allocator's capacity.
    InvalidSize(usize),

    /// No free block at or above the target order is available.
    ///
    /// This is recoverable: freeing blocks and retrying may succeed.
    OutOfMemory(usize),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidSize(size) => write!(f, "invalid allocation size {size}"),
            AllocError::OutOfMemory(size) => {
                write!(f, "no free block large enough for {size} units")
            }
        }
    }
}

/// The error type for [`BuddyAllocator::free`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FreeError {
    /// No allocated block starts at the given index.
    NotAllocated(usize),
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeError::NotAllocated(start) => write!(f, "no allocation starts at {start}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocInitError {}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

#[cfg(feature = "std")]
impl std::error::Error for FreeError {}
