//! Property-based coverage for the equivalence/hash compatibility invariant: any two programs
//! judged equivalent must hash equal. Built by generating small random programs from a fixed
//! grammar of non-branching and self-referential instructions, since an arbitrary `Instruction`
//! can reference handles that don't exist yet and isn't meaningful to derive `Arbitrary` for
//! directly.

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use rose_program::{equivalent, hash_program, Instruction, Program};

#[derive(Clone, Debug)]
enum Step {
    Report(u32, i32),
    CatchUp,
    BranchToEnd,
}

impl Arbitrary for Step {
    fn arbitrary(g: &mut Gen) -> Self {
        match u8::arbitrary(g) % 3 {
            0 => Step::Report(u32::arbitrary(g), i32::arbitrary(g)),
            1 => Step::CatchUp,
            _ => Step::BranchToEnd,
        }
    }
}

fn build(steps: &[Step]) -> Program {
    let mut program = Program::new();
    let end = program.end();
    for step in steps {
        let instr = match step {
            Step::Report(onmatch, offset_adjust) => Instruction::Report {
                onmatch: *onmatch,
                offset_adjust: *offset_adjust,
            },
            Step::CatchUp => Instruction::CatchUp,
            Step::BranchToEnd => Instruction::CheckOnlyEod { target: end },
        };
        program.add_before_end(instr).unwrap();
    }
    program
}

#[quickcheck]
fn equivalent_programs_hash_equal(steps: Vec<Step>) -> bool {
    let a = build(&steps);
    let b = build(&steps);
    // Two independently built programs from the same step sequence always reference their own
    // (differently numbered) END, so they're structurally identical but never share handles.
    equivalent(&a, &b).unwrap() && hash_program(&a) == hash_program(&b)
}

#[quickcheck]
fn a_program_is_always_equivalent_to_itself(steps: Vec<Step>) -> bool {
    let a = build(&steps);
    equivalent(&a, &a).unwrap()
}

#[quickcheck]
fn differing_report_payload_breaks_equivalence(onmatch_a: u32, onmatch_b: u32) -> bool {
    if onmatch_a == onmatch_b {
        return true;
    }
    let mut a = Program::new();
    a.add_before_end(Instruction::Report {
        onmatch: onmatch_a,
        offset_adjust: 0,
    })
    .unwrap();
    let mut b = Program::new();
    b.add_before_end(Instruction::Report {
        onmatch: onmatch_b,
        offset_adjust: 0,
    })
    .unwrap();
    !equivalent(&a, &b).unwrap()
}
