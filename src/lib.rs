//! Intermediate representation and assembler for the Rose scanning-program bytecode.
//!
//! A *program* is a small, arena-backed sequence of [`Instruction`]s, each tagged with one of a
//! closed catalogue of [`OpCode`]s. Programs are built incrementally (insertion, splicing,
//! replacement), then handed to [`assemble`] to produce a flat, position-independent byte stream
//! the scanning runtime can execute directly. Two programs that would assemble to the same stream
//! modulo the arbitrary handles used to build them compare equal under [`equivalent`] and hash
//! equal under [`hash_program`], regardless of how their instructions happen to be numbered.

#![warn(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod assembler;
pub mod blob;
pub mod config;
pub mod entity;
pub mod error;
pub mod hash;
pub mod inst;
pub mod multibit;
pub mod offset;
pub mod opcode;
pub mod program;

pub use crate::assembler::{assemble, layout, AssembleOutput, MAX_PROGRAM_BYTES};
pub use crate::blob::Blob;
pub use crate::entity::InstRef;
pub use crate::error::{Error, Result};
pub use crate::hash::{equivalent, hash_program};
pub use crate::inst::{Instruction, JumpEntry};
pub use crate::multibit::{DenseMultibitEncoder, MultibitEncoder};
pub use crate::offset::OffsetMap;
pub use crate::opcode::{OpCode, INSTR_MIN_ALIGN};
pub use crate::program::Program;
