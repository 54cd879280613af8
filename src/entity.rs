//! Entity reference used for instruction targets.
//!
//! Rose programs refer to other instructions by target, but those targets are not Rust
//! references: a program is free to relocate, splice, or replace instructions, which would leave
//! borrowed references dangling. Instead, following the arena-and-index discipline used
//! throughout this corpus for self-referential graphs, every instruction lives in a
//! [`cranelift_entity::PrimaryMap`] owned by its [`Program`](crate::program::Program), and a
//! target is a stable, densely-numbered [`InstRef`] handle into that map.

use cranelift_entity::entity_impl;

/// A non-owning reference to an instruction inside the program that owns it.
///
/// `InstRef` values are only meaningful relative to the [`Program`](crate::program::Program)
/// that allocated them; the same raw index in two different programs refers to two unrelated
/// instructions. Handles are allocated monotonically as instructions are inserted and are never
/// reused, so a handle remains valid for the lifetime of its owning program even as other
/// instructions are spliced in around it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstRef(u32);
entity_impl!(InstRef, "inst");
