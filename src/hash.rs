//! Whole-program hashing and equivalence.
//!
//! Two programs are *equivalent* when they'd assemble to the same instruction stream modulo the
//! arbitrary `InstRef` values used to build them — same opcodes in the same order, same non-target
//! fields, and every target resolving to the same offset once laid out. [`hash_program`] is
//! designed to agree with that relation: equivalent programs always hash equal, though (as with
//! any hash) the converse doesn't hold.

use crate::assembler::layout;
use crate::error::Result;
use crate::program::Program;

/// Combine a running hash with one more value, in the style of Boost's `hash_combine`: mixes
/// `value` in using the golden-ratio constant so that hashing a sequence of equal values doesn't
/// collapse onto a fixed point, and so that element order matters.
fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ (value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

/// Hash `program`'s sequence of instructions, ignoring target identity (two instructions that
/// differ only in which handle their target field names, but are otherwise identical, hash the
/// same — see [`crate::inst::Instruction::hash`]).
///
/// This is a structural hash over instruction *content*, not over assembled bytes; it never
/// fails and never touches a blob or offset map. Compare with [`equivalent`], which additionally
/// accounts for where targets actually end up once laid out.
pub fn hash_program(program: &Program) -> u64 {
    let mut seed = 0u64;
    for (_, instr) in program.iter() {
        seed = hash_combine(seed, instr.hash());
    }
    seed
}

/// True iff `a` and `b` assemble to structurally identical instruction streams: the same number
/// of instructions, each pair sharing an opcode and all non-target fields, and every target field
/// resolving to the same offset within its own program's layout.
///
/// Two equivalent programs always have `hash_program(a) == hash_program(b)`, but the converse
/// isn't guaranteed (hash collisions are possible, however unlikely); this is the authoritative
/// check, `hash_program` is the fast pre-filter.
pub fn equivalent(a: &Program, b: &Program) -> Result<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    let (a_offsets, _) = layout(a)?;
    let (b_offsets, _) = layout(b)?;

    for ((_, ia), (_, ib)) in a.iter().zip(b.iter()) {
        if !ia.equiv(ib, &a_offsets, &b_offsets) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Instruction;

    #[test]
    fn empty_programs_are_equivalent() {
        let a = Program::new();
        let b = Program::new();
        assert!(equivalent(&a, &b).unwrap());
        assert_eq!(hash_program(&a), hash_program(&b));
    }

    #[test]
    fn equivalence_ignores_handle_identity() {
        let mut a = Program::new();
        let end_a = a.end();
        a.add_before_end(Instruction::CheckOnlyEod { target: end_a })
            .unwrap();

        let mut b = Program::new();
        let end_b = b.end();
        // Insert an instruction first, then the branch, so `b`'s handles are numbered
        // differently from `a`'s even though the resulting program is the same shape.
        b.add_before_end(Instruction::CheckOnlyEod { target: end_b })
            .unwrap();

        assert!(equivalent(&a, &b).unwrap());
        assert_eq!(hash_program(&a), hash_program(&b));
    }

    #[test]
    fn differing_scalar_fields_are_not_equivalent() {
        let mut a = Program::new();
        a.add_before_end(Instruction::Report {
            onmatch: 1,
            offset_adjust: 0,
        })
        .unwrap();

        let mut b = Program::new();
        b.add_before_end(Instruction::Report {
            onmatch: 2,
            offset_adjust: 0,
        })
        .unwrap();

        assert!(!equivalent(&a, &b).unwrap());
    }

    #[test]
    fn differing_lengths_are_not_equivalent() {
        let a = Program::new();
        let mut b = Program::new();
        b.add_before_end(Instruction::CatchUp).unwrap();
        assert!(!equivalent(&a, &b).unwrap());
    }

    #[test]
    fn branching_to_different_relative_positions_is_not_equivalent() {
        // Same opcode sequence in both programs (CatchUp, CheckOnlyEod, End), but `a`'s branch
        // targets its own END while `b`'s targets the leading CatchUp — same shape, different
        // resolved offsets, so the programs are not equivalent.
        let mut a = Program::new();
        let end_a = a.end();
        a.add_before_end(Instruction::CatchUp).unwrap();
        a.add_before_end(Instruction::CheckOnlyEod { target: end_a })
            .unwrap();

        let mut b = Program::new();
        let catch_up_b = b.add_before_end(Instruction::CatchUp).unwrap();
        b.add_before_end(Instruction::CheckOnlyEod { target: catch_up_b })
            .unwrap();

        assert!(!equivalent(&a, &b).unwrap());
    }
}
