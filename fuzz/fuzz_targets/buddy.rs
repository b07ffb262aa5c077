#![no_main]
use arbitrary::{Arbitrary, Unstructured};
use buddy_hater::{AllocatorOp, BuddySubject, Evaluator};
use libfuzzer_sys::fuzz_target;

const MAX_TOTAL_SIZE: usize = 1 << 16;

#[derive(Clone, Debug)]
struct Args {
    total_size: usize,
    ops: Vec<AllocatorOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let total_size = usize::arbitrary(un)? % MAX_TOTAL_SIZE;
        let ops = Vec::arbitrary(un)?;

        Ok(Args { total_size, ops })
    }
}

fuzz_target!(|args: Args| {
    let Args { total_size, ops } = args;

    let subject = match BuddySubject::new(total_size) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = Evaluator::new(subject);
    if let Err(failed) = eval.evaluate(ops) {
        panic!("{failed}");
    }
});
