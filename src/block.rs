//! Buddy blocks.
//!
//! A block is a plain `(start, order)` value covering `2^order` units starting
//! at `start`. Blocks carry no links to their parent or children; the buddy
//! relationship is recovered from the bits of the start index.

use core::{fmt, ops::Range};

/// Rounds `x` up to the next power of two.
///
/// Returns `None` if `x` is zero or the result would overflow.
fn round_up_pow2(x: usize) -> Option<usize> {
    match x {
        0 => None,
        x => x.checked_next_power_of_two(),
    }
}

/// Returns the smallest order whose block size can hold `size` units.
///
/// This is `ceil(log2(size))`. Returns `None` for a size of zero, or a size
/// whose next power of two does not fit in a `usize`.
///
/// ```
/// use buddy_sim::order_for;
///
/// assert_eq!(order_for(1), Some(0));
/// assert_eq!(order_for(7), Some(3));
/// assert_eq!(order_for(8), Some(3));
/// assert_eq!(order_for(0), None);
/// ```
pub fn order_for(size: usize) -> Option<u32> {
    round_up_pow2(size).map(usize::trailing_zeros)
}

/// A block of `2^order` units starting at `start`.
///
/// The start index of a block is always a multiple of its size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    // Field order matters: the derived `Ord` sorts by start index first.
    start: usize,
    order: u32,
}

impl Block {
    /// Constructs a block.
    ///
    /// # Panics
    ///
    /// Panics if `start` is not a multiple of `2^order`, or if `2^order`
    /// does not fit in a `usize`.
    pub fn new(start: usize, order: u32) -> Block {
        assert!(
            order < usize::BITS,
            "block order {order} exceeds the width of a usize"
        );
        assert_eq!(
            start & ((1 << order) - 1),
            0,
            "block start {start} is not aligned to its size 2^{order}"
        );

        Block { start, order }
    }

    /// Returns the index of the first unit of the block.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the order of the block.
    #[inline]
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Returns the number of units in the block.
    #[inline]
    pub fn size(&self) -> usize {
        1 << self.order
    }

    /// Returns the index of the last unit of the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.size() - 1
    }

    /// Returns the half-open range of unit indices covered by the block.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size()
    }

    /// Returns the start index of this block's buddy.
    ///
    /// The buddy differs from this block only in bit `order` of the start.
    #[inline]
    pub fn buddy_start(&self) -> usize {
        self.start ^ self.size()
    }

    /// Returns `true` if `other` is this block's buddy.
    pub fn is_buddy_of(&self, other: &Block) -> bool {
        self.order == other.order && other.start == self.buddy_start()
    }

    /// Returns the block of the next order up which contains this one.
    ///
    /// # Panics
    ///
    /// Panics if `2^(order + 1)` does not fit in a `usize`.
    pub fn parent(&self) -> Block {
        Block::new(self.start & !self.size(), self.order + 1)
    }

    /// Splits the block into its lower and upper halves.
    ///
    /// Returns `None` for a block of order zero.
    pub fn split(&self) -> Option<(Block, Block)> {
        let order = self.order.checked_sub(1)?;
        let half = 1 << order;

        Some((
            Block::new(self.start, order),
            Block::new(self.start + half, order),
        ))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString;

    use super::*;

    #[test]
    fn order_for_rounds_up() {
        let expected = [(1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4), (64, 6)];

        for (size, order) in expected {
            assert_eq!(order_for(size), Some(order), "size {size}");
        }
    }

    #[test]
    fn order_for_rejects_zero_and_overflow() {
        assert_eq!(order_for(0), None);
        assert_eq!(order_for(usize::MAX), None);
        assert_eq!(order_for((1 << (usize::BITS - 1)) + 1), None);
        assert_eq!(order_for(1 << (usize::BITS - 1)), Some(usize::BITS - 1));
    }

    #[test]
    fn derived_quantities() {
        let b = Block::new(24, 3);
        assert_eq!(b.size(), 8);
        assert_eq!(b.end(), 31);
        assert_eq!(b.range(), 24..32);
        assert_eq!(b.to_string(), "24-31");
    }

    #[test]
    fn buddies_differ_in_one_bit() {
        let lower = Block::new(16, 3);
        let upper = Block::new(24, 3);

        assert_eq!(lower.buddy_start(), 24);
        assert_eq!(upper.buddy_start(), 16);
        assert!(lower.is_buddy_of(&upper));
        assert!(upper.is_buddy_of(&lower));

        // Adjacent and same-sized, but produced by different parents.
        let left = Block::new(8, 3);
        assert!(!left.is_buddy_of(&lower));

        // Same start bit pattern, different order.
        assert!(!lower.is_buddy_of(&Block::new(24, 2)));
    }

    #[test]
    fn split_then_parent() {
        let b = Block::new(32, 5);
        let (lo, hi) = b.split().unwrap();

        assert_eq!(lo, Block::new(32, 4));
        assert_eq!(hi, Block::new(48, 4));
        assert_eq!(lo.parent(), b);
        assert_eq!(hi.parent(), b);

        assert_eq!(Block::new(5, 0).split(), None);
    }

    #[test]
    #[should_panic]
    fn parent_of_largest_block_panics() {
        Block::new(0, usize::BITS - 1).parent();
    }

    #[test]
    fn ordering_is_by_start() {
        let mut blocks = [Block::new(8, 3), Block::new(0, 2), Block::new(4, 2)];
        blocks.sort();
        assert_eq!(
            blocks.map(|b| b.start()),
            [0, 4, 8],
        );
    }

    #[test]
    #[should_panic]
    fn misaligned_block_panics() {
        let _ = Block::new(4, 3);
    }
}
