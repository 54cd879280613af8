//! The offset map produced by assembler layout pass 1.
//!
//! An `OffsetMap` answers "where will this instruction end up in the assembled byte stream" for
//! every instruction reachable from a program's layout pass. It backs both real assembly (pass 2
//! reads it to resolve target fields) and the equivalence relation (two programs compare equal
//! iff their layout-pass offset maps agree position-by-position once targets are translated
//! through them).

use cranelift_entity::SecondaryMap;

use crate::entity::InstRef;
use crate::error::{Error, Result};
use crate::opcode::OpCode;

/// Maps an instruction to the byte offset it was assigned during layout, if it has one.
///
/// Instructions that are not reachable from the program's instruction order (e.g. the remnants
/// of a `replace`d or spliced-away instruction) never get an entry, which is exactly what makes
/// a lookup miss here mean "dangling target" rather than "offset zero".
pub type OffsetMap = SecondaryMap<InstRef, Option<u32>>;

/// Look up the offset of `target`, reporting a [`Error::DanglingTarget`] naming `owner` and
/// `opcode` if `target` was never assigned one.
pub fn require_offset(map: &OffsetMap, target: InstRef, owner: InstRef, opcode: OpCode) -> Result<u32> {
    map[target].ok_or(Error::DanglingTarget { inst: owner, opcode })
}
