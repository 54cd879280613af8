//! Build-time layout constants, collected in one place rather than hardcoded at each call site.
//!
//! The wire format this crate emits is fixed by the external scanner runtime it feeds, so there
//! is no runtime-configurable `AssembleOptions` to speak of yet; what's here is the set of
//! tunables a future target (a different runtime, a different addressable size) would need to
//! vary, re-exported from the modules that own them so a consumer doesn't have to know which
//! module defines which constant.

pub use crate::assembler::MAX_PROGRAM_BYTES;
pub use crate::opcode::INSTR_MIN_ALIGN;
