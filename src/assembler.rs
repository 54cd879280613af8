//! Two-pass assembly from a [`Program`] into a flat, position-independent byte stream.
//!
//! Pass 1 (layout) walks the program in order and assigns each instruction an aligned byte
//! offset, without writing anything; pass 2 (emit) allocates a zero-filled buffer of the total
//! size computed by pass 1 and writes every instruction's record into it, resolving target
//! fields through the offset map pass 1 produced and appending side payloads to the supplied
//! [`Blob`]. Splitting the work this way means every target can always be resolved during emit:
//! by the time any instruction is written, the whole program's layout is already known, including
//! instructions that appear later in program order.

use log::debug;

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::inst::SharedIterOffsets;
use crate::multibit::MultibitEncoder;
use crate::offset::OffsetMap;
use crate::opcode::INSTR_MIN_ALIGN;
use crate::program::Program;

/// The runtime's addressable bytecode limit. Programs whose assembled layout would exceed this
/// are rejected with [`Error::LayoutTooLarge`] rather than silently producing a program the
/// runtime can't address with a 32-bit offset.
pub const MAX_PROGRAM_BYTES: u64 = u32::MAX as u64;

/// The result of a successful assembly: the instruction stream and the layout offset map it was
/// produced from, in case a caller wants to relate a handle to its final offset.
#[derive(Debug, Clone)]
pub struct AssembleOutput {
    /// The flat, position-independent instruction stream. Does not include the auxiliary blob;
    /// callers that need a single contiguous image are responsible for concatenating
    /// `bytes` and `blob.as_bytes()` and adjusting blob-relative offsets by `bytes.len()`
    /// themselves, per their own image layout.
    pub bytes: Vec<u8>,
    /// The offset each instruction was assigned during layout.
    pub offsets: OffsetMap,
}

/// Compute the layout-only pass: an [`OffsetMap`] assigning every instruction in `program` its
/// aligned byte offset, and the total aligned size of the instruction stream.
///
/// This is pass 1 of assembly, and is also what program equivalence compares (see
/// [`crate::hash::equivalent`]) — it never touches the blob or writes any bytes.
pub fn layout(program: &Program) -> Result<(OffsetMap, u64)> {
    let mut offsets = OffsetMap::new();
    let mut cursor: u64 = 0;
    for (handle, instr) in program.iter() {
        if cursor > u32::MAX as u64 {
            return Err(Error::LayoutTooLarge {
                size: cursor,
                limit: MAX_PROGRAM_BYTES,
            });
        }
        offsets[handle] = Some(cursor as u32).into();
        cursor += instr.opcode().aligned_byte_length() as u64;
    }
    if cursor > MAX_PROGRAM_BYTES {
        return Err(Error::LayoutTooLarge {
            size: cursor,
            limit: MAX_PROGRAM_BYTES,
        });
    }
    Ok((offsets, cursor))
}

/// Assemble `program` into a flat byte stream, using `encoder` to serialise sparse-iterator
/// key sets into `blob`.
///
/// `program` must end in `END`, which it always does by construction ([`Program::new`] starts
/// with one and nothing in this crate's API can remove it), so there is nothing further to check
/// for [`Error::MissingEnd`] here; the variant exists for callers that hand-build a program
/// through lower-level means and want a named error instead of an assertion failure.
pub fn assemble(
    program: &Program,
    blob: &mut Blob,
    encoder: &dyn MultibitEncoder,
) -> Result<AssembleOutput> {
    let (offsets, total_len) = layout(program)?;
    debug!(
        "assembling program: {} instructions, {} bytes",
        program.len(),
        total_len
    );

    let mut bytes = vec![0u8; total_len as usize];
    let mut shared_iters: SharedIterOffsets = SharedIterOffsets::new();

    for (handle, instr) in program.iter() {
        let start = offsets[handle].expect("every instruction got an offset in layout");
        let record_len = instr.byte_length();
        let aligned_len = instr.opcode().aligned_byte_length();
        debug_assert!(record_len <= aligned_len);
        let dest = &mut bytes[start as usize..start as usize + record_len];
        instr.emit(dest, blob, &offsets, handle, encoder, &mut shared_iters)?;
        // The gap between `record_len` and `aligned_len` (if any) is already zero from the
        // buffer's initial fill; nothing further to do here, but assert the invariant holds so a
        // future opcode with a sloppy `byte_length` fails loudly instead of shipping garbage.
        debug_assert!(bytes[start as usize + record_len..start as usize + aligned_len]
            .iter()
            .all(|&b| b == 0));
    }

    debug!(
        "assembled {} bytes of instructions, {} bytes of auxiliary data",
        bytes.len(),
        blob.len()
    );

    Ok(AssembleOutput { bytes, offsets })
}

/// Alignment every instruction record in an assembled stream starts at. Re-exported here for
/// callers that want to validate an [`AssembleOutput`] without reaching into [`crate::opcode`].
pub const RECORD_ALIGN: usize = INSTR_MIN_ALIGN;

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::*;
    use crate::inst::Instruction;
    use crate::multibit::DenseMultibitEncoder;

    #[test]
    fn minimal_program_assembles_to_one_aligned_end_record() {
        let program = Program::new();
        let mut blob = Blob::new();
        let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();
        assert_eq!(out.bytes.len(), INSTR_MIN_ALIGN);
        assert_eq!(out.bytes[0], crate::opcode::OpCode::End.wire_value());
        assert!(out.bytes[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn branch_target_resolves_to_ends_offset() {
        let mut program = Program::new();
        let end = program.end();
        let branch = program
            .add_before_end(Instruction::CheckOnlyEod { target: end })
            .unwrap();
        let mut blob = Blob::new();
        let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

        let branch_offset = out.offsets[branch].unwrap();
        let end_offset = out.offsets[end].unwrap();
        let record = &out.bytes[branch_offset as usize..];
        let encoded_target = u32::from_le_bytes(record[1..5].try_into().unwrap());
        assert_eq!(encoded_target, end_offset);
    }

    #[test]
    fn report_record_round_trips_its_fields() {
        let mut program = Program::new();
        program
            .add_before_end(Instruction::Report {
                onmatch: 0xCAFE_BABE,
                offset_adjust: -4,
            })
            .unwrap();
        let mut blob = Blob::new();
        let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

        assert_eq!(out.bytes[0], crate::opcode::OpCode::Report.wire_value());
        let onmatch = u32::from_le_bytes(out.bytes[1..5].try_into().unwrap());
        let offset_adjust = i32::from_le_bytes(out.bytes[5..9].try_into().unwrap());
        assert_eq!(onmatch, 0xCAFE_BABE);
        assert_eq!(offset_adjust, -4);
    }

    #[test]
    fn sparse_iter_next_reuses_begins_offsets() {
        let mut program = Program::new();
        let end = program.end();
        let begin_ref = program
            .add_before_end(Instruction::SparseIterBegin {
                key_count: 4,
                keys: vec![0, 2],
                jump_table: vec![crate::inst::JumpEntry {
                    key_index: 0,
                    target: end,
                }],
                fallback: end,
            })
            .unwrap();
        program
            .add_before_end(Instruction::SparseIterNext {
                begin: begin_ref,
                fallback: end,
            })
            .unwrap();

        let mut blob = Blob::new();
        let out = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap();

        let begin_offset = out.offsets[begin_ref].unwrap();
        let begin_record = &out.bytes[begin_offset as usize..];
        let begin_iter_offset = u32::from_le_bytes(begin_record[1..5].try_into().unwrap());
        let begin_jt_offset = u32::from_le_bytes(begin_record[5..9].try_into().unwrap());

        let next_handle = program
            .iter()
            .find(|(_, i)| matches!(i, Instruction::SparseIterNext { .. }))
            .map(|(h, _)| h)
            .unwrap();
        let next_record_offset = out.offsets[next_handle].unwrap();
        let next_record = &out.bytes[next_record_offset as usize..];
        let next_iter_offset = u32::from_le_bytes(next_record[1..5].try_into().unwrap());
        let next_jt_offset = u32::from_le_bytes(next_record[5..9].try_into().unwrap());

        assert_eq!(begin_iter_offset, next_iter_offset);
        assert_eq!(begin_jt_offset, next_jt_offset);
    }

    #[test]
    fn sparse_iter_next_before_begin_is_rejected() {
        let mut program = Program::new();
        let end = program.end();
        // Insert BEGIN first to get a live handle, but place NEXT *before* it in program order,
        // so `begin` is a valid target (it's in the program) yet unreached when NEXT is emitted.
        let begin_ref = program
            .add_before_end(Instruction::SparseIterBegin {
                key_count: 1,
                keys: vec![0],
                jump_table: vec![],
                fallback: end,
            })
            .unwrap();
        program
            .insert(
                0,
                Instruction::SparseIterNext {
                    begin: begin_ref,
                    fallback: end,
                },
            )
            .unwrap();
        let mut blob = Blob::new();
        let err = assemble(&program, &mut blob, &DenseMultibitEncoder).unwrap_err();
        assert!(matches!(err, Error::SparseIterNextBeforeBegin { .. }));
    }

    #[test]
    fn small_program_layout_is_well_under_the_addressable_limit() {
        let mut program = Program::new();
        program
            .add_before_end(Instruction::Report {
                onmatch: 1,
                offset_adjust: 0,
            })
            .unwrap();
        let (_offsets, total_len) = layout(&program).unwrap();
        assert!(total_len < MAX_PROGRAM_BYTES);
    }
}
