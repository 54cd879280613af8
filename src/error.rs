//! Error taxonomy for the program IR and assembler.
//!
//! Follows the structural / resource / arithmetic split from the component's error handling
//! design: structural errors are programmer bugs in how a program was built, resource errors
//! come from exhausting a fixed-size collaborator (the auxiliary blob, the addressable layout
//! space), and arithmetic errors come from a scalar payload that doesn't fit its serialised
//! width. All three are fatal: nothing at this layer retries or recovers, it only reports.

use thiserror::Error;

use crate::entity::InstRef;
use crate::opcode::OpCode;

/// Errors produced while building, assembling, or comparing programs.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    /// A target field resolved to an instruction that isn't (or is no longer) contained in the
    /// owning program.
    #[error("instruction {inst} ({opcode}) targets an instruction not present in the program")]
    DanglingTarget { inst: InstRef, opcode: OpCode },

    /// A program was used (assembled, hashed, mutated) without a terminating `END`.
    #[error("program is missing its terminating END instruction")]
    MissingEnd,

    /// An instruction was passed to `insert`/`add_block` that is already owned by another
    /// program.
    #[error("instruction {inst} is already owned by another program")]
    AlreadyOwned { inst: InstRef },

    /// An insertion was requested at the end iterator, which has no successor to insert before.
    #[error("cannot insert before the end iterator")]
    InsertAtEndIterator,

    /// The auxiliary blob ran out of capacity while interning side data.
    #[error("auxiliary blob exhausted: requested {requested} bytes, {available} available")]
    BlobOverflow { requested: usize, available: usize },

    /// The assembled program's total size exceeds the runtime's addressable bytecode limit.
    #[error("assembled program size {size} exceeds the addressable limit of {limit} bytes")]
    LayoutTooLarge { size: u64, limit: u64 },

    /// A `SPARSE_ITER_NEXT` referenced a `SPARSE_ITER_BEGIN` that hasn't been emitted yet.
    #[error("SPARSE_ITER_NEXT at {next} refers to SPARSE_ITER_BEGIN at {begin}, which has not been emitted yet")]
    SparseIterNextBeforeBegin { next: InstRef, begin: InstRef },

    /// A scalar payload field is out of range for its serialised width.
    #[error("value {value} out of range for `{field}` on {opcode} (width {width} bits)")]
    ScalarOutOfRange {
        opcode: OpCode,
        field: &'static str,
        value: i64,
        width: u32,
    },
}

/// Convenience result alias used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;
