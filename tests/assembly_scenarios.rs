//! Integration coverage for the program/assembler contract: building programs through the
//! public API, assembling them, and checking the resulting bytes and offsets directly, the way a
//! consumer embedding this crate would.

use std::convert::TryInto;

use rose_program::{
    assemble, equivalent, hash_program, Blob, DenseMultibitEncoder, Instruction, JumpEntry,
    OpCode, Program, INSTR_MIN_ALIGN,
};

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().unwrap())
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes(bytes[..4].try_into().unwrap())
}

#[test]
fn minimal_program() {
    let program = Program::new();
    assert_eq!(program.len(), 1);
    assert!(program.is_empty());

    let mut blob = Blob::new();
    let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

    assert_eq!(out.bytes.len(), INSTR_MIN_ALIGN);
    assert_eq!(out.bytes[0], OpCode::End.wire_value());
    assert!(out.bytes[1..].iter().all(|&b| b == 0));
}

#[test]
fn report_record() {
    let mut program = Program::new();
    program
        .add_before_end(Instruction::Report {
            onmatch: 42,
            offset_adjust: -1,
        })
        .unwrap();

    let mut blob = Blob::new();
    let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

    let expected_len = OpCode::Report.aligned_byte_length() + OpCode::End.aligned_byte_length();
    assert_eq!(out.bytes.len(), expected_len);
    assert_eq!(out.bytes[0], OpCode::Report.wire_value());
    assert_eq!(le_u32(&out.bytes[1..5]), 42);
    assert_eq!(le_i32(&out.bytes[5..9]), -1);
}

#[test]
fn branch_to_end() {
    let mut program = Program::new();
    let end = program.end();
    let branch = program
        .add_before_end(Instruction::CheckBounds {
            min: 10,
            max: 100,
            target: end,
        })
        .unwrap();

    let mut blob = Blob::new();
    let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

    let branch_offset = out.offsets[branch].unwrap() as usize;
    let end_offset = out.offsets[end].unwrap();
    // opcode byte, then min (8 bytes), max (8 bytes), then the 4-byte target.
    let target_field = &out.bytes[branch_offset + 1 + 8 + 8..branch_offset + 1 + 8 + 8 + 4];
    assert_eq!(le_u32(target_field), end_offset);
}

#[test]
fn splice_with_end_rewrite() {
    let mut a = Program::new();
    a.add_before_end(Instruction::Report {
        onmatch: 1,
        offset_adjust: 0,
    })
    .unwrap();
    let a_end = a.end();

    let mut b = Program::new();
    b.add_before_end(Instruction::Report {
        onmatch: 2,
        offset_adjust: 0,
    })
    .unwrap();

    // A branch elsewhere in `a` that targets `a`'s END should end up targeting `b`'s leading
    // REPORT once `b` is appended in its place.
    let branch = a
        .add_before_end(Instruction::CheckOnlyEod { target: a_end })
        .unwrap();

    a.add_block(b).unwrap();

    assert_eq!(a.len(), 4); // REPORT(1), CHECK_ONLY_EOD, REPORT(2), END
    let opcodes: Vec<OpCode> = a.iter().map(|(_, i)| i.opcode()).collect();
    assert_eq!(
        opcodes,
        vec![
            OpCode::Report,
            OpCode::CheckOnlyEod,
            OpCode::Report,
            OpCode::End,
        ]
    );

    if let Instruction::CheckOnlyEod { target } = a.get(branch) {
        match a.get(*target) {
            Instruction::Report { onmatch: 2, .. } => {}
            other => panic!("branch should now target REPORT(2), got {other:?}"),
        }
    } else {
        unreachable!();
    }
}

#[test]
fn equivalence_under_different_pointers() {
    let mut p = Program::new();
    let p_end = p.end();
    p.add_before_end(Instruction::CheckOnlyEod { target: p_end })
        .unwrap();

    let mut q = Program::new();
    let q_end = q.end();
    q.add_before_end(Instruction::CheckOnlyEod { target: q_end })
        .unwrap();

    assert!(equivalent(&p, &q).unwrap());
    assert_eq!(hash_program(&p), hash_program(&q));

    let mut blob_p = Blob::new();
    let mut blob_q = Blob::new();
    let out_p = assemble(&p, &mut blob_p, &DenseMultibitEncoder).unwrap();
    let out_q = assemble(&q, &mut blob_q, &DenseMultibitEncoder).unwrap();
    assert_eq!(out_p.bytes, out_q.bytes);
}

#[test]
fn sparse_iterator_sharing() {
    let mut program = Program::new();
    let end = program.end();
    let t1 = program.add_before_end(Instruction::CatchUp).unwrap();
    let t2 = program.add_before_end(Instruction::CatchUpMpv).unwrap();

    let begin = program
        .add_before_end(Instruction::SparseIterBegin {
            key_count: 8,
            keys: vec![3, 7],
            jump_table: vec![
                JumpEntry {
                    key_index: 3,
                    target: t1,
                },
                JumpEntry {
                    key_index: 7,
                    target: t2,
                },
            ],
            fallback: end,
        })
        .unwrap();
    let next = program
        .add_before_end(Instruction::SparseIterNext {
            begin,
            fallback: end,
        })
        .unwrap();

    let mut blob = Blob::new();
    let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

    let begin_offset = out.offsets[begin].unwrap() as usize;
    let next_offset = out.offsets[next].unwrap() as usize;

    let begin_iter_offset = le_u32(&out.bytes[begin_offset + 1..]);
    let begin_jt_offset = le_u32(&out.bytes[begin_offset + 5..]);
    let next_iter_offset = le_u32(&out.bytes[next_offset + 1..]);
    let next_jt_offset = le_u32(&out.bytes[next_offset + 5..]);

    assert_eq!(begin_iter_offset, next_iter_offset);
    assert_eq!(begin_jt_offset, next_jt_offset);

    // Exactly one iterator bit-vector and one jump table were written for the shared pair, not
    // one per instruction: the jump table is 2 entries * 8 bytes = 16 bytes, the bit-vector for
    // 8 keys is 1 byte (padded up to the encoder's 4-byte alignment); total blob usage is
    // bounded tightly rather than doubled.
    assert!(blob.len() <= 4 + 16);
}
