//! A binary-buddy allocator.
//!
//! The allocator manages a space of `2^max_order` units. Free and allocated
//! blocks are tracked per order; allocation splits the smallest sufficient
//! free block down to the requested order, and freeing merges a block with its
//! buddy for as long as the buddy is free.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case               |
//! |--------------------------|-----------|--------------------------|
//! | Allocate                 | O(1)      | O(max_order + n)         |
//! | Free                     | O(log n)  | O(max_order * n)         |
//!
//! where `n` is the number of blocks held by a single order.
//!
//! #### Fragmentation
//!
//! Requests are rounded up to a power of two, so internal fragmentation can
//! approach half of each block. Free blocks of one order that are not buddies
//! cannot be merged, which is the source of external fragmentation.

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, trace, warn};

use crate::{
    block::{order_for, Block},
    AllocError, AllocInitError, FreeError,
};

/// The free and allocated blocks of a single order.
#[derive(Debug)]
struct BuddyLevel {
    order: u32,
    /// Free blocks, sorted by start index.
    free: Vec<Block>,
    /// Allocated blocks, sorted by start index.
    allocated: Vec<Block>,
}

impl BuddyLevel {
    fn new(order: u32) -> BuddyLevel {
        BuddyLevel {
            order,
            free: Vec::new(),
            allocated: Vec::new(),
        }
    }

    /// Inserts `block` into `list`, keeping it sorted.
    fn insert_sorted(list: &mut Vec<Block>, block: Block) {
        match list.binary_search(&block) {
            Ok(_) => panic!("block {block} is already registered"),
            Err(idx) => list.insert(idx, block),
        }
    }

    /// Removes the block starting at `start` from `list`, if present.
    fn remove_sorted(list: &mut Vec<Block>, start: usize) -> Option<Block> {
        let idx = list.binary_search_by_key(&start, Block::start).ok()?;
        Some(list.remove(idx))
    }

    /// Pushes a block onto the free list.
    fn free_list_push(&mut self, block: Block) {
        assert_eq!(block.order(), self.order);
        Self::insert_sorted(&mut self.free, block);
    }

    /// Pops the free block with the lowest start index.
    ///
    /// If the free list is empty, returns `None`.
    fn free_list_pop(&mut self) -> Option<Block> {
        (!self.free.is_empty()).then(|| self.free.remove(0))
    }

    /// Removes the free block which starts at `start`.
    ///
    /// If the block is not present, returns `None`.
    fn free_list_find_remove(&mut self, start: usize) -> Option<Block> {
        Self::remove_sorted(&mut self.free, start)
    }

    /// Records `block` as allocated.
    fn assign(&mut self, block: Block) {
        assert_eq!(block.order(), self.order);
        Self::insert_sorted(&mut self.allocated, block);
    }

    /// Removes the allocated block which starts at `start`.
    fn unassign(&mut self, start: usize) -> Option<Block> {
        Self::remove_sorted(&mut self.allocated, start)
    }

    fn is_allocated(&self, start: usize) -> bool {
        self.allocated
            .binary_search_by_key(&start, Block::start)
            .is_ok()
    }
}

/// Whether a block is free or allocated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// The block is available for allocation.
    Free,
    /// The block has been handed out by [`BuddyAllocator::allocate`].
    Allocated,
}

/// A block of the allocator's space, tagged with its state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// The block.
    pub block: Block,
    /// Whether the block is free or allocated.
    pub state: BlockState,
}

/// The result of a successful [`BuddyAllocator::allocate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// The allocated block.
    pub block: Block,
    /// The number of units originally requested.
    pub requested: usize,
    /// The blocks that were split to satisfy the request, in split order.
    pub splits: Vec<Block>,
}

/// Two buddies which were merged into their parent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Merge {
    /// The buddy with the lower start index.
    pub lower: Block,
    /// The buddy with the higher start index.
    pub upper: Block,
}

impl Merge {
    /// Returns the block produced by the merge.
    pub fn parent(&self) -> Block {
        self.lower.parent()
    }
}

/// The result of a successful [`BuddyAllocator::free`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deallocation {
    /// The block that was freed, before any merging.
    pub block: Block,
    /// The merges performed after freeing, in merge order.
    pub merges: Vec<Merge>,
}

/// Summary statistics of an allocator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuddyStats {
    /// The number of units managed by the allocator.
    pub total_units: usize,
    /// The number of units in free blocks.
    pub free_units: usize,
    /// The number of units in allocated blocks.
    pub used_units: usize,
    /// The number of free blocks of each order, indexed by order.
    pub free_blocks_by_order: Vec<usize>,
}

/// A binary-buddy allocator over a simulated unit space.
///
/// The allocator is constructed with a total size in units, which is rounded
/// up to the next power of two. Initially the whole space is a single free
/// block of order `max_order`.
///
/// ```
/// use buddy_sim::{BuddyAllocator, AllocError};
///
/// let mut buddy = BuddyAllocator::new(64);
///
/// let all = buddy.allocate(64).unwrap();
/// assert!(all.splits.is_empty());
/// assert_eq!(buddy.allocate(1), Err(AllocError::OutOfMemory(1)));
/// ```
#[derive(Debug)]
pub struct BuddyAllocator {
    /// The size requested at construction.
    total_size: usize,
    max_order: u32,
    /// One level per order, indexed by order.
    levels: Vec<BuddyLevel>,
}

impl BuddyAllocator {
    /// Constructs a new `BuddyAllocator` managing `total_size` units.
    ///
    /// # Errors
    ///
    /// Returns `Err(AllocInitError::InvalidSize)` if `total_size` is zero or
    /// its next power of two does not fit in a `usize`.
    pub fn try_new(total_size: usize) -> Result<BuddyAllocator, AllocInitError> {
        let max_order = order_for(total_size).ok_or(AllocInitError::InvalidSize(total_size))?;

        let mut levels: Vec<BuddyLevel> = (0..=max_order).map(BuddyLevel::new).collect();
        levels[max_order as usize].free_list_push(Block::new(0, max_order));

        trace!(
            "buddy: created allocator of {} units (max order {})",
            total_size,
            max_order
        );

        Ok(BuddyAllocator {
            total_size,
            max_order,
            levels,
        })
    }

    /// Constructs a new `BuddyAllocator` managing `total_size` units.
    ///
    /// # Panics
    ///
    /// Panics if `total_size` is zero or its next power of two does not fit
    /// in a `usize`.
    pub fn new(total_size: usize) -> BuddyAllocator {
        match BuddyAllocator::try_new(total_size) {
            Ok(b) => b,
            Err(e) => panic!("{e}"),
        }
    }

    /// Returns the size requested at construction.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Returns the number of units managed, `2^max_order`.
    pub fn capacity(&self) -> usize {
        1 << self.max_order
    }

    /// Returns the order of the largest block.
    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    fn level(&self, order: u32) -> &BuddyLevel {
        &self.levels[order as usize]
    }

    fn level_mut(&mut self, order: u32) -> &mut BuddyLevel {
        &mut self.levels[order as usize]
    }

    /// Returns the highest order a block starting at `start` can have.
    ///
    /// A block's start is a multiple of its size, so the trailing zeros of
    /// `start` bound its order.
    fn max_order_at(&self, start: usize) -> u32 {
        match start {
            0 => self.max_order,
            s => s.trailing_zeros().min(self.max_order),
        }
    }

    /// Allocates a block of at least `size` units.
    ///
    /// The block is the smallest power of two that can hold `size`. If no
    /// free block of that order exists, the smallest larger free block is
    /// split repeatedly, and the lower half of each split is carried down.
    /// Among free blocks of one order, the lowest start index is always taken.
    ///
    /// On success, the returned [`Allocation`] lists every block that was
    /// split, in the order the splits happened.
    ///
    /// # Errors
    ///
    /// Returns `Err(AllocError::InvalidSize)` if `size` is zero or exceeds the
    /// capacity, and `Err(AllocError::OutOfMemory)` if no free block is large
    /// enough. The allocator is unchanged in both cases.
    pub fn allocate(&mut self, size: usize) -> Result<Allocation, AllocError> {
        let target_order = order_for(size)
            .filter(|&order| order <= self.max_order)
            .ok_or(AllocError::InvalidSize(size))?;

        // Scan increasing block sizes until a free block is found.
        let (init_order, mut block) = (target_order..=self.max_order)
            .find_map(|order| {
                self.levels[order as usize]
                    .free_list_pop()
                    .map(|block| (order, block))
            })
            .ok_or_else(|| {
                warn!("buddy: no free block for {} units", size);
                AllocError::OutOfMemory(size)
            })?;

        let mut splits = Vec::with_capacity((init_order - target_order) as usize);

        // Every order between the target and `init_order` is empty, so the
        // lower half of each split is the lowest free block of its order.
        for order in (target_order..init_order).rev() {
            debug!("buddy: splitting {}/{}", block.start(), block.size());
            splits.push(block);

            let lower = Block::new(block.start(), order);
            let upper = Block::new(block.start() + lower.size(), order);

            self.level_mut(order).free_list_push(upper);
            block = lower;
        }

        self.level_mut(target_order).assign(block);
        trace!("buddy: allocated {} for {} units", block, size);

        Ok(Allocation {
            block,
            requested: size,
            splits,
        })
    }

    /// Frees the allocated block starting at `start`.
    ///
    /// The freed block is merged with its buddy if the buddy is free, and the
    /// merged block with its own buddy, until a buddy is not free or the
    /// whole space is one block. Free blocks of the same order which are not
    /// buddies are never merged.
    ///
    /// # Errors
    ///
    /// Returns `Err(FreeError::NotAllocated)` if no allocated block starts
    /// exactly at `start`. The allocator is unchanged in that case.
    pub fn free(&mut self, start: usize) -> Result<Deallocation, FreeError> {
        let max_order = self.max_order_at(start);

        let freed = self.levels[..=max_order as usize]
            .iter_mut()
            .find_map(|level| level.unassign(start))
            .ok_or(FreeError::NotAllocated(start))?;

        trace!("buddy: freeing {}", freed);

        let mut merges = Vec::new();
        let mut block = freed;

        while block.order() < self.max_order {
            let buddy = match self
                .level_mut(block.order())
                .free_list_find_remove(block.buddy_start())
            {
                Some(b) => b,
                None => break,
            };

            let (lower, upper) = if block < buddy {
                (block, buddy)
            } else {
                (buddy, block)
            };

            debug!(
                "buddy: merging {}/{} and {}/{}",
                lower.start(),
                lower.size(),
                upper.start(),
                upper.size()
            );

            merges.push(Merge { lower, upper });
            block = lower.parent();
        }

        self.level_mut(block.order()).free_list_push(block);

        Ok(Deallocation {
            block: freed,
            merges,
        })
    }

    /// Returns `true` if an allocated block starts at `start`.
    pub fn is_allocated(&self, start: usize) -> bool {
        (0..=self.max_order_at(start)).any(|order| self.level(order).is_allocated(start))
    }

    /// Returns every block, free or allocated, sorted by start index.
    ///
    /// The blocks tile the whole space `[0, capacity)` without gaps.
    pub fn snapshot(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self
            .levels
            .iter()
            .flat_map(|level| {
                let free = level.free.iter().map(|&block| Region {
                    block,
                    state: BlockState::Free,
                });
                let allocated = level.allocated.iter().map(|&block| Region {
                    block,
                    state: BlockState::Allocated,
                });

                free.chain(allocated)
            })
            .collect();

        regions.sort_unstable_by_key(|r| r.block);
        debug_assert!(regions
            .windows(2)
            .all(|w| w[0].block.start() != w[1].block.start()));

        regions
    }

    /// Returns the number of units in free blocks.
    pub fn free_units(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.free.len() << level.order)
            .sum()
    }

    /// Returns the number of units in allocated blocks.
    pub fn used_units(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.allocated.len() << level.order)
            .sum()
    }

    /// Returns summary statistics for the allocator.
    pub fn stats(&self) -> BuddyStats {
        BuddyStats {
            total_units: self.capacity(),
            free_units: self.free_units(),
            used_units: self.used_units(),
            free_blocks_by_order: self.levels.iter().map(|level| level.free.len()).collect(),
        }
    }
}
