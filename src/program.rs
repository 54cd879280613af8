//! The program container: an owned, ordered sequence of instructions.
//!
//! A [`Program`] behaves like a small, append-mostly arena of [`Instruction`]s (the arena
//! discipline from [`crate::entity`]) plus a `Vec<InstRef>` recording the *order* instructions
//! execute in. The two are kept separate deliberately: replacing or splicing instructions must
//! never invalidate a handle still held elsewhere, so handles are allocated monotonically and
//! never reused, while the order vector is free to shuffle as structural mutations happen.

use std::collections::HashMap;

use cranelift_entity::{EntityRef, PrimaryMap};

use crate::entity::InstRef;
use crate::error::{Error, Result};
use crate::inst::Instruction;

/// An owned, ordered sequence of instructions, always terminated by a single `END`.
#[derive(Clone, Debug)]
pub struct Program {
    insts: PrimaryMap<InstRef, Instruction>,
    order: Vec<InstRef>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Create a new program containing only the terminating `END`.
    pub fn new() -> Self {
        let mut insts = PrimaryMap::new();
        let end = insts.push(Instruction::End);
        Self {
            insts,
            order: vec![end],
        }
    }

    /// True iff this program contains only the `END`.
    pub fn is_empty(&self) -> bool {
        self.order.len() == 1
    }

    /// Number of instructions in the program, including `END`.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Handle of the terminating `END` instruction.
    pub fn end(&self) -> InstRef {
        *self.order.last().expect("program always has an END")
    }

    /// Borrow the instruction a handle refers to.
    pub fn get(&self, r: InstRef) -> &Instruction {
        &self.insts[r]
    }

    /// True iff `r` is part of this program's current instruction order (as opposed to a stale
    /// handle left over from a `replace` or a splice that's no longer reachable).
    pub fn contains(&self, r: InstRef) -> bool {
        self.order.contains(&r)
    }

    /// Iterate over `(handle, instruction)` pairs in program order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (InstRef, &Instruction)> {
        self.order.iter().map(move |&r| (r, &self.insts[r]))
    }

    /// Iterate over instructions in reverse program order.
    pub fn iter_rev(&self) -> impl Iterator<Item = (InstRef, &Instruction)> {
        self.iter().rev()
    }

    /// Validate that every target of `instr` refers to an instruction already contained in this
    /// program. Used as the insertion precondition: "targets must point to instructions already
    /// in this program."
    fn validate_targets(&self, instr: &Instruction, holder: InstRef) -> Result<()> {
        let mut err = None;
        instr.for_each_target(|t| {
            if err.is_none() && !self.order.contains(&t) {
                err = Some(Error::DanglingTarget {
                    inst: holder,
                    opcode: instr.opcode(),
                });
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Insert `instr` before the instruction currently at order-index `pos`.
    ///
    /// `pos` must be a valid index into the program's current order and must not be the end
    /// iterator (i.e. `pos < self.len()`); there is always at least the `END` to insert before.
    pub fn insert(&mut self, pos: usize, instr: Instruction) -> Result<InstRef> {
        if pos >= self.order.len() {
            return Err(Error::InsertAtEndIterator);
        }
        // Validate against a handle that doesn't exist yet (we validate before allocating, so
        // use a placeholder only for the error path's `inst` field; targets reference existing
        // program instructions, not the not-yet-inserted one, so this never actually fires with
        // a bogus handle attached to the error).
        let provisional = self.insts.next_key();
        self.validate_targets(&instr, provisional)?;
        let handle = self.insts.push(instr);
        self.order.insert(pos, handle);
        Ok(handle)
    }

    /// Shorthand for `insert(position_of_end, instr)`.
    pub fn add_before_end(&mut self, instr: Instruction) -> Result<InstRef> {
        let pos = self.order.len() - 1;
        self.insert(pos, instr)
    }

    /// Splice `block`'s instructions (minus its own trailing `END`) into this program before
    /// order-index `pos`. Every target inside `block` that pointed at `block`'s `END` is
    /// rewritten to point at the instruction currently at `pos`; `block` is consumed.
    pub fn insert_block(&mut self, pos: usize, block: Program) -> Result<()> {
        if pos >= self.order.len() {
            return Err(Error::InsertAtEndIterator);
        }
        let successor = self.order[pos];
        let moved = self.splice_in(block, successor)?;
        for (i, handle) in moved.into_iter().enumerate() {
            self.order.insert(pos + i, handle);
        }
        Ok(())
    }

    /// Shorthand for `insert_block(position_of_end, block)`.
    pub fn add_before_end_block(&mut self, block: Program) -> Result<()> {
        let pos = self.order.len() - 1;
        self.insert_block(pos, block)
    }

    /// Append `block`, replacing the current `END`. Every target in this program that pointed at
    /// the old `END` is rewritten to point at the first instruction of `block`. `block`'s own
    /// `END` becomes the new terminator.
    pub fn add_block(&mut self, block: Program) -> Result<()> {
        let old_end = self.order.pop().expect("program always has an END");
        let (new_order, _remap) = self.absorb(block)?;
        let new_first = *new_order.first().expect("absorbed block is never empty");
        self.rewrite_all(old_end, new_first);
        self.order.extend(new_order);
        Ok(())
    }

    /// Swap the instruction at order-index `pos` for `instr`. Every target in the program that
    /// pointed at the old instruction is rewritten to point at the new one.
    pub fn replace(&mut self, pos: usize, instr: Instruction) -> Result<InstRef> {
        let old = *self
            .order
            .get(pos)
            .ok_or(Error::InsertAtEndIterator)?;
        let provisional = self.insts.next_key();
        self.validate_targets(&instr, provisional)?;
        let new = self.insts.push(instr);
        self.order[pos] = new;
        self.rewrite_all(old, new);
        Ok(new)
    }

    /// Run `rewrite_target(old, new)` over every instruction currently in the program's order.
    /// This is the only mechanism by which cross-references move.
    fn rewrite_all(&mut self, old: InstRef, new: InstRef) {
        for &r in &self.order {
            self.insts[r].rewrite_target(old, new);
        }
    }

    /// Move every instruction of `block` into this program's arena, assigning each a fresh
    /// handle and rewriting its internal targets to the new handles. `end_target` is what
    /// `block`'s own `END` should be remapped to in the result (the splice successor for
    /// `insert_block`, or left unused by callers that keep `block`'s `END` verbatim).
    ///
    /// Returns the list of new handles in `block`'s original order (including its `END` mapped
    /// to `end_target` and therefore *not* present in the arena as a new `End` instruction).
    ///
    /// Two-pass, like `assembler::layout`/`assemble`: every new handle is decided up front before
    /// any instruction is rewritten or pushed, so a target naming a *later* instruction in the
    /// block (including `block`'s own `END`) resolves correctly instead of only ever seeing
    /// handles remapped earlier in a single forward pass.
    fn splice_in(&mut self, block: Program, end_target: InstRef) -> Result<Vec<InstRef>> {
        let block_end = block.end();
        let moved_handles: Vec<InstRef> = block
            .order
            .iter()
            .copied()
            .filter(|&h| h != block_end)
            .collect();

        let mut remap = HashMap::with_capacity(moved_handles.len() + 1);
        remap.insert(block_end, end_target);
        let base = self.insts.next_key().index();
        for (i, &old_handle) in moved_handles.iter().enumerate() {
            remap.insert(old_handle, InstRef::new(base + i));
        }

        let mut moved = Vec::with_capacity(moved_handles.len());
        for &old_handle in &moved_handles {
            let mut instr = block.get(old_handle).clone();
            // Every target must be internal to the block or the block's own END; anything else
            // is a genuinely dangling target, not an artifact of processing order.
            let mut missing = false;
            instr.for_each_target(|t| {
                if !remap.contains_key(&t) {
                    missing = true;
                }
            });
            if missing {
                return Err(Error::DanglingTarget {
                    inst: old_handle,
                    opcode: instr.opcode(),
                });
            }
            instr.remap_targets(|t| remap[&t]);
            let new_handle = self.insts.push(instr);
            debug_assert_eq!(new_handle, remap[&old_handle]);
            moved.push(new_handle);
        }
        Ok(moved)
    }

    /// Like `splice_in`, but keeps `block`'s own `END` alive as the new terminator instead of
    /// remapping it away. Returns the new handles in `block`'s original order, plus the full
    /// remap table (old handle -> new handle) for every instruction in `block`, including its
    /// `END`. Two-pass for the same reason as `splice_in`.
    fn absorb(
        &mut self,
        block: Program,
    ) -> Result<(Vec<InstRef>, HashMap<InstRef, InstRef>)> {
        let base = self.insts.next_key().index();
        let mut remap = HashMap::with_capacity(block.order.len());
        for (i, &old_handle) in block.order.iter().enumerate() {
            remap.insert(old_handle, InstRef::new(base + i));
        }

        let mut new_order = Vec::with_capacity(block.order.len());
        for &old_handle in &block.order {
            let mut instr = block.get(old_handle).clone();
            let mut missing = false;
            instr.for_each_target(|t| {
                if !remap.contains_key(&t) {
                    missing = true;
                }
            });
            if missing {
                return Err(Error::DanglingTarget {
                    inst: old_handle,
                    opcode: instr.opcode(),
                });
            }
            instr.remap_targets(|t| remap[&t]);
            let new_handle = self.insts.push(instr);
            debug_assert_eq!(new_handle, remap[&old_handle]);
            new_order.push(new_handle);
        }
        Ok((new_order, remap))
    }
}
