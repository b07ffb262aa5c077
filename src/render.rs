//! Textual rendering of allocator state.

use core::fmt;

use crate::buddy::{BlockState, BuddyAllocator};

impl BlockState {
    /// Returns the glyph used for one unit of a block in this state.
    pub fn glyph(self) -> char {
        match self {
            BlockState::Free => '-',
            BlockState::Allocated => '#',
        }
    }
}

/// Renders an allocator as a strip of unit cells.
///
/// Each unit of space is one glyph (see [`BlockState::glyph`]); blocks are
/// delimited by `|`, in ascending start order.
///
/// ```
/// use buddy_sim::{BuddyAllocator, Strip};
///
/// let mut buddy = BuddyAllocator::new(8);
/// assert_eq!(Strip::new(&buddy).to_string(), "|--------|");
///
/// buddy.allocate(2).unwrap();
/// assert_eq!(Strip::new(&buddy).to_string(), "|##|--|----|");
/// ```
#[derive(Debug)]
pub struct Strip<'a> {
    allocator: &'a BuddyAllocator,
}

impl<'a> Strip<'a> {
    /// Constructs a strip over `allocator`.
    pub fn new(allocator: &'a BuddyAllocator) -> Strip<'a> {
        Strip { allocator }
    }
}

impl fmt::Display for Strip<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("|")?;

        for region in self.allocator.snapshot() {
            let glyph = region.state.glyph();
            for _ in 0..region.block.size() {
                fmt::Write::write_char(f, glyph)?;
            }
            f.write_str("|")?;
        }

        Ok(())
    }
}
