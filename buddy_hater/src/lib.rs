//! A small library for ~~hating on~~ evaluating the correctness of buddy allocators.
//!
//! An [`Evaluator`] drives a [`Subject`] with a sequence of [`AllocatorOp`]s.
//! Every unit handed out is "painted" with the ID of the operation that
//! allocated it; any later allocation that touches painted units, or any
//! subject-specific invariant violation, fails the evaluation.

use std::{fmt, ops::Range};

use arbitrary::Arbitrary;
use buddy_sim::{AllocInitError, BlockState, BuddyAllocator, Region};

/// Limit on allocation size, expressed in bits.
const ALLOC_LIMIT_BITS: u8 = 12;

#[derive(Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
}

/// An operation to perform on a subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocatorOp {
    /// Allocate a block of at least this many units.
    Alloc(usize),
    /// Free an outstanding allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `idx % n`.
    Dealloc(usize),
}

impl Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => {
                // Spread sizes evenly across powers of two.
                let exp = u8::arbitrary(u)? % (ALLOC_LIMIT_BITS + 1);
                AllocatorOp::Alloc(usize::arbitrary(u)? % (1 << exp))
            }
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
        };

        Ok(op)
    }
}

/// An allocator under evaluation.
pub trait Subject {
    type AllocError: fmt::Debug;
    type FreeError: fmt::Debug;

    /// Returns the number of units the subject manages.
    fn capacity(&self) -> usize;

    /// Allocates at least `size` units, returning the allocated unit range.
    fn allocate(&mut self, size: usize) -> Result<Range<usize>, Self::AllocError>;

    /// Frees the allocation starting at `start`.
    fn free(&mut self, start: usize) -> Result<(), Self::FreeError>;

    /// Checks subject-specific invariants. Called after every operation.
    fn verify(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A [`BuddyAllocator`] under evaluation.
#[derive(Debug)]
pub struct BuddySubject(BuddyAllocator);

impl BuddySubject {
    pub fn new(total_size: usize) -> Result<Self, AllocInitError> {
        let b = BuddyAllocator::try_new(total_size)?;
        Ok(BuddySubject(b))
    }

    pub fn inner(&self) -> &BuddyAllocator {
        &self.0
    }
}

impl Subject for BuddySubject {
    type AllocError = buddy_sim::AllocError;
    type FreeError = buddy_sim::FreeError;

    fn capacity(&self) -> usize {
        self.0.capacity()
    }

    fn allocate(&mut self, size: usize) -> Result<Range<usize>, Self::AllocError> {
        self.0.allocate(size).map(|a| a.block.range())
    }

    fn free(&mut self, start: usize) -> Result<(), Self::FreeError> {
        self.0.free(start).map(drop)
    }

    fn verify(&self) -> Result<(), String> {
        check_regions(&self.0.snapshot(), self.0.capacity())
    }
}

/// Checks that `regions`, sorted by start, tile `[0, capacity)` exactly and
/// hold no pair of free buddies.
fn check_regions(regions: &[Region], capacity: usize) -> Result<(), String> {
    let mut next = 0;
    for region in regions {
        if region.block.start() != next {
            return Err(format!(
                "gap or overlap at unit {next}: next block is {}",
                region.block
            ));
        }
        next = region.block.range().end;
    }

    if next != capacity {
        return Err(format!("blocks end at {next}, not {capacity}"));
    }

    // With the regions sorted by start, a free buddy pair is adjacent.
    for pair in regions.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.state == BlockState::Free
            && b.state == BlockState::Free
            && a.block.is_buddy_of(&b.block)
        {
            return Err(format!("free buddies {} and {} were not merged", a.block, b.block));
        }
    }

    Ok(())
}

/// Records which operation owns each unit.
struct Units {
    owners: Vec<Option<u64>>,
}

impl Units {
    fn new(capacity: usize) -> Units {
        Units {
            owners: vec![None; capacity],
        }
    }

    /// Marks `range` as owned by `id`.
    ///
    /// Fails with the first unit that is out of bounds or already owned.
    fn paint(&mut self, range: Range<usize>, id: u64) -> Result<(), usize> {
        if range.end > self.owners.len() {
            return Err(self.owners.len());
        }

        if let Some(ofs) = self.owners[range.clone()].iter().position(Option::is_some) {
            return Err(range.start + ofs);
        }

        self.owners[range].fill(Some(id));
        Ok(())
    }

    /// Verifies that `range` is still owned entirely by `id`.
    fn verify(&self, range: Range<usize>, id: u64) -> bool {
        self.owners[range].iter().all(|&owner| owner == Some(id))
    }

    fn erase(&mut self, range: Range<usize>) {
        self.owners[range].fill(None);
    }
}

/// An allocated block of units.
#[derive(Clone, Debug)]
pub struct Block {
    range: Range<usize>,
    // The unique ID of the operation that allocated this block.
    id: u64,
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: Option<AllocatorOp>,
    pub reason: String,
}

impl fmt::Display for Failed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failed_op {
            Some(op) => write!(
                f,
                "{op:?} failed after {} operations: {}",
                self.completed.len(),
                self.reason
            ),
            None => write!(f, "cleanup failed: {}", self.reason),
        }
    }
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    fn step(
        &mut self,
        units: &mut Units,
        blocks: &mut Blocks,
        op_id: u64,
        op: &AllocatorOp,
    ) -> Result<(), String> {
        match *op {
            AllocatorOp::Alloc(size) => {
                if let Ok(range) = self.subject.allocate(size) {
                    if range.len() < size {
                        return Err(format!("{range:?} is too small for {size} units"));
                    }

                    if let Err(unit) = units.paint(range.clone(), op_id) {
                        return Err(format!("{range:?} overlaps a live allocation at unit {unit}"));
                    }

                    blocks.push(Block { range, id: op_id });
                }
            }

            AllocatorOp::Dealloc(raw_idx) => {
                let block = match blocks.remove_modulo(raw_idx) {
                    Some(b) => b,
                    None => return Ok(()),
                };

                if !units.verify(block.range.clone(), block.id) {
                    return Err(format!("{:?} was overwritten", block.range));
                }

                self.subject
                    .free(block.range.start)
                    .map_err(|e| format!("freeing {:?} failed: {e:?}", block.range))?;
                units.erase(block.range);
            }
        }

        self.subject.verify()
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut units = Units::new(self.subject.capacity());
        let mut blocks = Blocks::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();

            if let Err(reason) = self.step(&mut units, &mut blocks, op_id, &op) {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                    reason,
                });
            }

            completed.push(op);
        }

        for block in blocks {
            let res = if units.verify(block.range.clone(), block.id) {
                self.subject
                    .free(block.range.start)
                    .map_err(|e| format!("freeing {:?} failed: {e:?}", block.range))
                    .and_then(|()| self.subject.verify())
            } else {
                Err(format!("{:?} was overwritten", block.range))
            };

            if let Err(reason) = res {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    reason,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use arbitrary::Unstructured;

    use super::*;

    #[test]
    fn buddy_survives_a_fixed_sequence() {
        use AllocatorOp::*;

        let ops = vec![
            Alloc(7),
            Alloc(8),
            Alloc(0),
            Alloc(100),
            Dealloc(0),
            Alloc(3),
            Alloc(16),
            Dealloc(5),
            Dealloc(1),
            Alloc(64),
        ];

        let mut eval = Evaluator::new(BuddySubject::new(64).unwrap());
        eval.evaluate(ops).unwrap();

        // Cleanup frees everything, so the root block is whole again.
        let subject = eval.into_subject();
        assert_eq!(subject.inner().free_units(), 64);
    }

    #[test]
    fn buddy_survives_arbitrary_sequences() {
        let mut seed = 0x2545_f491_4f6c_dd1d_u64;

        for total_size in [1, 3, 64, 1000] {
            // A simple xorshift stream stands in for fuzzer input.
            let data: Vec<u8> = (0..4096)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    seed as u8
                })
                .collect();

            let mut u = Unstructured::new(&data);
            let ops = Vec::<AllocatorOp>::arbitrary(&mut u).unwrap();

            let mut eval = Evaluator::new(BuddySubject::new(total_size).unwrap());
            if let Err(e) = eval.evaluate(ops) {
                panic!("size {total_size}: {e}");
            }
        }
    }

    /// A subject that hands out the same units twice.
    struct Overlapping {
        next: usize,
    }

    impl Subject for Overlapping {
        type AllocError = ();
        type FreeError = ();

        fn capacity(&self) -> usize {
            16
        }

        fn allocate(&mut self, size: usize) -> Result<Range<usize>, ()> {
            let start = self.next;
            self.next = (self.next + size) / 2;
            Ok(start..start + size)
        }

        fn free(&mut self, _: usize) -> Result<(), ()> {
            Ok(())
        }
    }

    #[test]
    fn overlapping_allocations_are_caught() {
        let mut eval = Evaluator::new(Overlapping { next: 0 });
        let failed = eval
            .evaluate([AllocatorOp::Alloc(4), AllocatorOp::Alloc(4)])
            .unwrap_err();

        assert_eq!(failed.completed, vec![AllocatorOp::Alloc(4)]);
        assert_eq!(failed.failed_op, Some(AllocatorOp::Alloc(4)));
    }

    fn region(start: usize, order: u32, state: BlockState) -> Region {
        Region {
            block: buddy_sim::Block::new(start, order),
            state,
        }
    }

    #[test]
    fn check_regions_accepts_valid_states() {
        use BlockState::*;

        assert_eq!(check_regions(&[region(0, 4, Free)], 16), Ok(()));
        assert_eq!(
            check_regions(
                &[region(0, 2, Allocated), region(4, 2, Free), region(8, 3, Free)],
                16
            ),
            Ok(())
        );

        // Adjacent free blocks of one order that are not buddies are fine.
        assert_eq!(
            check_regions(
                &[
                    region(0, 2, Allocated),
                    region(4, 2, Free),
                    region(8, 2, Free),
                    region(12, 2, Allocated),
                ],
                16
            ),
            Ok(())
        );
    }

    #[test]
    fn check_regions_catches_gaps_and_overlaps() {
        use BlockState::*;

        let gap = [region(0, 2, Allocated), region(8, 3, Free)];
        assert!(check_regions(&gap, 16).unwrap_err().contains("gap or overlap at unit 4"));

        let overlap = [region(0, 3, Allocated), region(4, 2, Free), region(8, 3, Free)];
        assert!(check_regions(&overlap, 16).unwrap_err().contains("gap or overlap at unit 8"));

        let short = [region(0, 3, Allocated)];
        assert!(check_regions(&short, 16).unwrap_err().contains("blocks end at 8, not 16"));
    }

    #[test]
    fn check_regions_catches_unmerged_buddies() {
        use BlockState::*;

        let uncoalesced = [region(0, 2, Free), region(4, 2, Free), region(8, 3, Allocated)];
        let err = check_regions(&uncoalesced, 16).unwrap_err();
        assert!(err.contains("free buddies 0-3 and 4-7 were not merged"), "{err}");
    }

    #[test]
    fn units_paint_and_erase() {
        let mut units = Units::new(8);

        units.paint(0..4, 1).unwrap();
        assert_eq!(units.paint(2..6, 2), Err(2));
        assert_eq!(units.paint(6..10, 2), Err(8));
        assert!(units.verify(0..4, 1));

        units.erase(0..4);
        units.paint(2..6, 2).unwrap();
        assert!(!units.verify(0..4, 1));
    }
}
