//! Instruction values: the tagged variant that is the unit of a Rose program.
//!
//! Every instruction owns one payload per [`OpCode`] arm. Targets (fields that name another
//! instruction in the same program) are deliberately excluded from [`Instruction::hash`] and
//! handled specially by [`Instruction::equiv`]: they're discriminated by the *offset* the target
//! resolves to once assembled, not by which [`InstRef`] happens to be stored, since two IR
//! instructions built independently can point at different handles that land at the same place.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::blob::Blob;
use crate::entity::InstRef;
use crate::error::{Error, Result};
use crate::multibit::MultibitEncoder;
use crate::offset::{require_offset, OffsetMap};
use crate::opcode::OpCode;

/// Offsets (iterator bit-vector, jump table) recorded per `SPARSE_ITER_BEGIN` as the assembler
/// walks a program in order, so a later `SPARSE_ITER_NEXT` can reuse them instead of re-encoding.
pub type SharedIterOffsets = HashMap<InstRef, (u32, u32)>;

/// One entry of a sparse iterator's jump table: visiting `key_index` branches to `target`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct JumpEntry {
    pub key_index: u32,
    pub target: InstRef,
}

/// A single Rose program instruction.
///
/// Field names mirror the vocabulary used in spec.md/the glossary (`dkey`, `ekey`, `lag`,
/// `queue`, `onmatch`, ...) rather than generic `field0`/`field1` placeholders, matching how the
/// teacher names instruction operands after what they mean, not their position.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    AnchoredDelay {
        target: InstRef,
    },
    CheckLitEarly {
        min_offset: u32,
        target: InstRef,
    },
    CheckGroups {
        groups: u64,
        target: InstRef,
    },
    CheckOnlyEod {
        target: InstRef,
    },
    CheckBounds {
        min: u64,
        max: u64,
        target: InstRef,
    },
    CheckNotHandled {
        key: u32,
        target: InstRef,
    },
    CheckLookaround {
        index: u32,
        count: u32,
        target: InstRef,
    },
    CheckMask {
        and_mask: u64,
        cmp_mask: u64,
        neg_mask: u64,
        offset: i32,
        target: InstRef,
    },
    CheckMask32 {
        and_mask: [u8; 32],
        cmp_mask: [u8; 32],
        neg_mask: u32,
        offset: i32,
        target: InstRef,
    },
    CheckByte {
        and_mask: u8,
        cmp_mask: u8,
        negate: bool,
        offset: i32,
        target: InstRef,
    },
    CheckInfix {
        queue: u32,
        lag: u32,
        report: u32,
        target: InstRef,
    },
    CheckPrefix {
        queue: u32,
        lag: u32,
        report: u32,
        target: InstRef,
    },
    PushDelayed {
        delay: u8,
        index: u32,
    },
    RecordAnchored {
        id: u32,
    },
    CatchUp,
    CatchUpMpv,
    SomAdjust {
        distance: u32,
    },
    SomLeftfix {
        queue: u32,
        lag: u32,
    },
    SomFromReport {
        som: u32,
    },
    SomZero,
    TriggerInfix {
        queue: u32,
        event: u8,
        cancel: bool,
    },
    TriggerSuffix {
        queue: u32,
        event: u8,
    },
    Dedupe {
        dkey: u32,
        offset_adjust: i32,
        target: InstRef,
    },
    DedupeSom {
        dkey: u32,
        offset_adjust: i32,
        target: InstRef,
    },
    ReportChain {
        report: u32,
        top_squash_distance: u32,
    },
    ReportSomInt {
        report: u32,
        som: u32,
    },
    ReportSomAware {
        report: u32,
        som: u32,
    },
    Report {
        onmatch: u32,
        offset_adjust: i32,
    },
    ReportExhaust {
        onmatch: u32,
        offset_adjust: i32,
        ekey: u32,
    },
    ReportSom {
        onmatch: u32,
        offset_adjust: i32,
    },
    ReportSomExhaust {
        onmatch: u32,
        offset_adjust: i32,
        ekey: u32,
    },
    DedupeAndReport {
        dkey: u32,
        onmatch: u32,
        offset_adjust: i32,
        target: InstRef,
    },
    FinalReport {
        onmatch: u32,
        offset_adjust: i32,
    },
    CheckExhausted {
        ekey: u32,
        target: InstRef,
    },
    CheckMinLength {
        end_adjust: i32,
        min_length: u64,
        target: InstRef,
    },
    SetState {
        index: u32,
    },
    SetGroups {
        groups: u64,
    },
    SquashGroups {
        groups: u64,
    },
    CheckState {
        index: u32,
        target: InstRef,
    },
    SparseIterBegin {
        key_count: u32,
        keys: Vec<u32>,
        jump_table: Vec<JumpEntry>,
        fallback: InstRef,
    },
    SparseIterNext {
        begin: InstRef,
        fallback: InstRef,
    },
    SparseIterAny {
        key_count: u32,
        keys: Vec<u32>,
        target: InstRef,
    },
    EnginesEod {
        id: u32,
    },
    SuffixesEod,
    MatcherEod,
    End,
}

/// Maximum value storable in [`Instruction::PushDelayed`]'s `delay` field (4-bit wire width).
pub const MAX_DELAY: u8 = 15;
/// Maximum value storable in a queue-trigger `event` field (3-bit wire width).
pub const MAX_TRIGGER_EVENT: u8 = 7;

fn check_width(opcode: OpCode, field: &'static str, value: u64, width_bits: u32) -> Result<()> {
    let max = if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    };
    if value > max {
        Err(Error::ScalarOutOfRange {
            opcode,
            field,
            value: value as i64,
            width: width_bits,
        })
    } else {
        Ok(())
    }
}

/// Thin little-endian record writer, mirroring the `put1`/`put2`/`put4`/`put8` shape of a
/// `CodeSink`: each instruction writes its own fixed-size record through one of these.
struct RecordWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> RecordWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put1(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    fn put4(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn put_i32(&mut self, v: i32) {
        self.put4(v as u32);
    }

    fn put8(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }
}

impl Instruction {
    /// The opcode tag of this instruction.
    pub fn opcode(&self) -> OpCode {
        use Instruction::*;
        match self {
            AnchoredDelay { .. } => OpCode::AnchoredDelay,
            CheckLitEarly { .. } => OpCode::CheckLitEarly,
            CheckGroups { .. } => OpCode::CheckGroups,
            CheckOnlyEod { .. } => OpCode::CheckOnlyEod,
            CheckBounds { .. } => OpCode::CheckBounds,
            CheckNotHandled { .. } => OpCode::CheckNotHandled,
            CheckLookaround { .. } => OpCode::CheckLookaround,
            CheckMask { .. } => OpCode::CheckMask,
            CheckMask32 { .. } => OpCode::CheckMask32,
            CheckByte { .. } => OpCode::CheckByte,
            CheckInfix { .. } => OpCode::CheckInfix,
            CheckPrefix { .. } => OpCode::CheckPrefix,
            PushDelayed { .. } => OpCode::PushDelayed,
            RecordAnchored { .. } => OpCode::RecordAnchored,
            CatchUp => OpCode::CatchUp,
            CatchUpMpv => OpCode::CatchUpMpv,
            SomAdjust { .. } => OpCode::SomAdjust,
            SomLeftfix { .. } => OpCode::SomLeftfix,
            SomFromReport { .. } => OpCode::SomFromReport,
            SomZero => OpCode::SomZero,
            TriggerInfix { .. } => OpCode::TriggerInfix,
            TriggerSuffix { .. } => OpCode::TriggerSuffix,
            Dedupe { .. } => OpCode::Dedupe,
            DedupeSom { .. } => OpCode::DedupeSom,
            ReportChain { .. } => OpCode::ReportChain,
            ReportSomInt { .. } => OpCode::ReportSomInt,
            ReportSomAware { .. } => OpCode::ReportSomAware,
            Report { .. } => OpCode::Report,
            ReportExhaust { .. } => OpCode::ReportExhaust,
            ReportSom { .. } => OpCode::ReportSom,
            ReportSomExhaust { .. } => OpCode::ReportSomExhaust,
            DedupeAndReport { .. } => OpCode::DedupeAndReport,
            FinalReport { .. } => OpCode::FinalReport,
            CheckExhausted { .. } => OpCode::CheckExhausted,
            CheckMinLength { .. } => OpCode::CheckMinLength,
            SetState { .. } => OpCode::SetState,
            SetGroups { .. } => OpCode::SetGroups,
            SquashGroups { .. } => OpCode::SquashGroups,
            CheckState { .. } => OpCode::CheckState,
            SparseIterBegin { .. } => OpCode::SparseIterBegin,
            SparseIterNext { .. } => OpCode::SparseIterNext,
            SparseIterAny { .. } => OpCode::SparseIterAny,
            EnginesEod { .. } => OpCode::EnginesEod,
            SuffixesEod => OpCode::SuffixesEod,
            MatcherEod => OpCode::MatcherEod,
            End => OpCode::End,
        }
    }

    /// The packed, pre-alignment record length for this instruction.
    pub fn byte_length(&self) -> usize {
        self.opcode().byte_length()
    }

    /// Invoke `f` for every target field this instruction carries, in a stable order.
    ///
    /// This is the single place that knows which fields of which opcode are targets; both
    /// [`Self::rewrite_target`] and the program container's closure checks are built on it.
    pub fn for_each_target(&self, mut f: impl FnMut(InstRef)) {
        use Instruction::*;
        match self {
            AnchoredDelay { target }
            | CheckLitEarly { target, .. }
            | CheckGroups { target, .. }
            | CheckOnlyEod { target }
            | CheckBounds { target, .. }
            | CheckNotHandled { target, .. }
            | CheckLookaround { target, .. }
            | CheckMask { target, .. }
            | CheckMask32 { target, .. }
            | CheckByte { target, .. }
            | CheckInfix { target, .. }
            | CheckPrefix { target, .. }
            | Dedupe { target, .. }
            | DedupeSom { target, .. }
            | DedupeAndReport { target, .. }
            | CheckExhausted { target, .. }
            | CheckMinLength { target, .. }
            | CheckState { target, .. } => f(*target),
            SparseIterBegin {
                jump_table,
                fallback,
                ..
            } => {
                for entry in jump_table {
                    f(entry.target);
                }
                f(*fallback);
            }
            SparseIterNext { begin, fallback } => {
                f(*begin);
                f(*fallback);
            }
            SparseIterAny { target, .. } => f(*target),
            PushDelayed { .. }
            | RecordAnchored { .. }
            | CatchUp
            | CatchUpMpv
            | SomAdjust { .. }
            | SomLeftfix { .. }
            | SomFromReport { .. }
            | SomZero
            | TriggerInfix { .. }
            | TriggerSuffix { .. }
            | ReportChain { .. }
            | ReportSomInt { .. }
            | ReportSomAware { .. }
            | Report { .. }
            | ReportExhaust { .. }
            | ReportSom { .. }
            | ReportSomExhaust { .. }
            | FinalReport { .. }
            | SetState { .. }
            | SetGroups { .. }
            | SquashGroups { .. }
            | EnginesEod { .. }
            | SuffixesEod
            | MatcherEod
            | End => {}
        }
    }

    /// Replace every target field equal to `old` with `new`.
    ///
    /// `SPARSE_ITER_BEGIN` rewrites both its fallback and every jump table entry;
    /// `SPARSE_ITER_NEXT` additionally rewrites its companion `SPARSE_ITER_BEGIN` reference.
    pub fn rewrite_target(&mut self, old: InstRef, new: InstRef) {
        use Instruction::*;
        let swap = |t: &mut InstRef| {
            if *t == old {
                *t = new;
            }
        };
        match self {
            AnchoredDelay { target }
            | CheckLitEarly { target, .. }
            | CheckGroups { target, .. }
            | CheckOnlyEod { target }
            | CheckBounds { target, .. }
            | CheckNotHandled { target, .. }
            | CheckLookaround { target, .. }
            | CheckMask { target, .. }
            | CheckMask32 { target, .. }
            | CheckByte { target, .. }
            | CheckInfix { target, .. }
            | CheckPrefix { target, .. }
            | Dedupe { target, .. }
            | DedupeSom { target, .. }
            | DedupeAndReport { target, .. }
            | CheckExhausted { target, .. }
            | CheckMinLength { target, .. }
            | CheckState { target, .. } => swap(target),
            SparseIterBegin {
                jump_table,
                fallback,
                ..
            } => {
                for entry in jump_table.iter_mut() {
                    swap(&mut entry.target);
                }
                swap(fallback);
            }
            SparseIterNext { begin, fallback } => {
                swap(begin);
                swap(fallback);
            }
            SparseIterAny { target, .. } => swap(target),
            PushDelayed { .. }
            | RecordAnchored { .. }
            | CatchUp
            | CatchUpMpv
            | SomAdjust { .. }
            | SomLeftfix { .. }
            | SomFromReport { .. }
            | SomZero
            | TriggerInfix { .. }
            | TriggerSuffix { .. }
            | ReportChain { .. }
            | ReportSomInt { .. }
            | ReportSomAware { .. }
            | Report { .. }
            | ReportExhaust { .. }
            | ReportSom { .. }
            | ReportSomExhaust { .. }
            | FinalReport { .. }
            | SetState { .. }
            | SetGroups { .. }
            | SquashGroups { .. }
            | EnginesEod { .. }
            | SuffixesEod
            | MatcherEod
            | End => {}
        }
    }

    /// Replace every target field by calling `f` on its current value once.
    ///
    /// Unlike repeated calls to [`Self::rewrite_target`], this visits each field exactly once, so
    /// it is the correct primitive for applying a whole-program handle remap: `rewrite_target`
    /// composed pairwise over a remap table can misfire when an old handle's replacement value
    /// collides with another key still to be processed.
    pub fn remap_targets(&mut self, mut f: impl FnMut(InstRef) -> InstRef) {
        use Instruction::*;
        match self {
            AnchoredDelay { target }
            | CheckLitEarly { target, .. }
            | CheckGroups { target, .. }
            | CheckOnlyEod { target }
            | CheckBounds { target, .. }
            | CheckNotHandled { target, .. }
            | CheckLookaround { target, .. }
            | CheckMask { target, .. }
            | CheckMask32 { target, .. }
            | CheckByte { target, .. }
            | CheckInfix { target, .. }
            | CheckPrefix { target, .. }
            | Dedupe { target, .. }
            | DedupeSom { target, .. }
            | DedupeAndReport { target, .. }
            | CheckExhausted { target, .. }
            | CheckMinLength { target, .. }
            | CheckState { target, .. } => *target = f(*target),
            SparseIterBegin {
                jump_table,
                fallback,
                ..
            } => {
                for entry in jump_table.iter_mut() {
                    entry.target = f(entry.target);
                }
                *fallback = f(*fallback);
            }
            SparseIterNext { begin, fallback } => {
                *begin = f(*begin);
                *fallback = f(*fallback);
            }
            SparseIterAny { target, .. } => *target = f(*target),
            PushDelayed { .. }
            | RecordAnchored { .. }
            | CatchUp
            | CatchUpMpv
            | SomAdjust { .. }
            | SomLeftfix { .. }
            | SomFromReport { .. }
            | SomZero
            | TriggerInfix { .. }
            | TriggerSuffix { .. }
            | ReportChain { .. }
            | ReportSomInt { .. }
            | ReportSomAware { .. }
            | Report { .. }
            | ReportExhaust { .. }
            | ReportSom { .. }
            | ReportSomExhaust { .. }
            | FinalReport { .. }
            | SetState { .. }
            | SetGroups { .. }
            | SquashGroups { .. }
            | EnginesEod { .. }
            | SuffixesEod
            | MatcherEod
            | End => {}
        }
    }

    /// Structural hash over the opcode and every non-target field.
    ///
    /// Targets are excluded on purpose: two instructions that differ only in which instruction
    /// they point at must hash identically, since [`Self::equiv`] discriminates them by offset
    /// instead.
    pub fn hash(&self) -> u64 {
        use Instruction::*;
        let mut hasher = DefaultHasher::new();
        self.opcode().hash(&mut hasher);
        match self {
            AnchoredDelay { .. } | CheckOnlyEod { .. } => {}
            CheckLitEarly { min_offset, .. } => min_offset.hash(&mut hasher),
            CheckGroups { groups, .. } => groups.hash(&mut hasher),
            CheckBounds { min, max, .. } => {
                min.hash(&mut hasher);
                max.hash(&mut hasher);
            }
            CheckNotHandled { key, .. } => key.hash(&mut hasher),
            CheckLookaround { index, count, .. } => {
                index.hash(&mut hasher);
                count.hash(&mut hasher);
            }
            CheckMask {
                and_mask,
                cmp_mask,
                neg_mask,
                offset,
                ..
            } => {
                and_mask.hash(&mut hasher);
                cmp_mask.hash(&mut hasher);
                neg_mask.hash(&mut hasher);
                offset.hash(&mut hasher);
            }
            CheckMask32 {
                and_mask,
                cmp_mask,
                neg_mask,
                offset,
                ..
            } => {
                and_mask.hash(&mut hasher);
                cmp_mask.hash(&mut hasher);
                neg_mask.hash(&mut hasher);
                offset.hash(&mut hasher);
            }
            CheckByte {
                and_mask,
                cmp_mask,
                negate,
                offset,
                ..
            } => {
                and_mask.hash(&mut hasher);
                cmp_mask.hash(&mut hasher);
                negate.hash(&mut hasher);
                offset.hash(&mut hasher);
            }
            CheckInfix {
                queue, lag, report, ..
            }
            | CheckPrefix {
                queue, lag, report, ..
            } => {
                queue.hash(&mut hasher);
                lag.hash(&mut hasher);
                report.hash(&mut hasher);
            }
            PushDelayed { delay, index } => {
                delay.hash(&mut hasher);
                index.hash(&mut hasher);
            }
            RecordAnchored { id } | EnginesEod { id } => id.hash(&mut hasher),
            CatchUp | CatchUpMpv | SomZero | SuffixesEod | MatcherEod | End => {}
            SomAdjust { distance } => distance.hash(&mut hasher),
            SomLeftfix { queue, lag } => {
                queue.hash(&mut hasher);
                lag.hash(&mut hasher);
            }
            SomFromReport { som } => som.hash(&mut hasher),
            TriggerInfix { queue, event, cancel } => {
                queue.hash(&mut hasher);
                event.hash(&mut hasher);
                cancel.hash(&mut hasher);
            }
            TriggerSuffix { queue, event } => {
                queue.hash(&mut hasher);
                event.hash(&mut hasher);
            }
            Dedupe {
                dkey, offset_adjust, ..
            }
            | DedupeSom {
                dkey, offset_adjust, ..
            } => {
                dkey.hash(&mut hasher);
                offset_adjust.hash(&mut hasher);
            }
            ReportChain {
                report,
                top_squash_distance,
            } => {
                report.hash(&mut hasher);
                top_squash_distance.hash(&mut hasher);
            }
            ReportSomInt { report, som } | ReportSomAware { report, som } => {
                report.hash(&mut hasher);
                som.hash(&mut hasher);
            }
            Report {
                onmatch,
                offset_adjust,
            }
            | ReportSom {
                onmatch,
                offset_adjust,
            }
            | FinalReport {
                onmatch,
                offset_adjust,
            } => {
                onmatch.hash(&mut hasher);
                offset_adjust.hash(&mut hasher);
            }
            ReportExhaust {
                onmatch,
                offset_adjust,
                ekey,
            }
            | ReportSomExhaust {
                onmatch,
                offset_adjust,
                ekey,
            } => {
                onmatch.hash(&mut hasher);
                offset_adjust.hash(&mut hasher);
                ekey.hash(&mut hasher);
            }
            DedupeAndReport {
                dkey,
                onmatch,
                offset_adjust,
                ..
            } => {
                dkey.hash(&mut hasher);
                onmatch.hash(&mut hasher);
                offset_adjust.hash(&mut hasher);
            }
            CheckExhausted { ekey, .. } => ekey.hash(&mut hasher),
            CheckMinLength {
                end_adjust,
                min_length,
                ..
            } => {
                end_adjust.hash(&mut hasher);
                min_length.hash(&mut hasher);
            }
            SetState { index } | CheckState { index, .. } => index.hash(&mut hasher),
            SetGroups { groups } | SquashGroups { groups } => groups.hash(&mut hasher),
            SparseIterBegin {
                key_count,
                keys,
                jump_table,
                ..
            } => {
                key_count.hash(&mut hasher);
                keys.hash(&mut hasher);
                for entry in jump_table {
                    entry.key_index.hash(&mut hasher);
                }
            }
            SparseIterAny { key_count, keys, .. } => {
                key_count.hash(&mut hasher);
                keys.hash(&mut hasher);
            }
            SparseIterNext { .. } => {}
        }
        hasher.finish()
    }

    /// True iff `self` and `other` share an opcode, share all non-target fields bit-for-bit, and
    /// every target field resolves to the same assembled offset once translated through
    /// `self_offsets`/`other_offsets` respectively.
    pub fn equiv(&self, other: &Instruction, self_offsets: &OffsetMap, other_offsets: &OffsetMap) -> bool {
        use Instruction::*;

        // A target is equivalent iff both sides have an assigned offset and the offsets match;
        // an unassigned (dangling) target never compares equal to anything.
        let same_target = |a: InstRef, b: InstRef| -> bool {
            matches!(
                (self_offsets[a], other_offsets[b]),
                (Some(oa), Some(ob)) if oa == ob
            )
        };

        match (self, other) {
            (AnchoredDelay { target: a }, AnchoredDelay { target: b }) => same_target(*a, *b),
            (CheckOnlyEod { target: a }, CheckOnlyEod { target: b }) => same_target(*a, *b),
            (
                CheckLitEarly {
                    min_offset: m1,
                    target: a,
                },
                CheckLitEarly {
                    min_offset: m2,
                    target: b,
                },
            ) => m1 == m2 && same_target(*a, *b),
            (
                CheckGroups { groups: g1, target: a },
                CheckGroups { groups: g2, target: b },
            ) => g1 == g2 && same_target(*a, *b),
            (
                CheckBounds {
                    min: min1,
                    max: max1,
                    target: a,
                },
                CheckBounds {
                    min: min2,
                    max: max2,
                    target: b,
                },
            ) => min1 == min2 && max1 == max2 && same_target(*a, *b),
            (
                CheckNotHandled { key: k1, target: a },
                CheckNotHandled { key: k2, target: b },
            ) => k1 == k2 && same_target(*a, *b),
            (
                CheckLookaround {
                    index: i1,
                    count: c1,
                    target: a,
                },
                CheckLookaround {
                    index: i2,
                    count: c2,
                    target: b,
                },
            ) => i1 == i2 && c1 == c2 && same_target(*a, *b),
            (
                CheckMask {
                    and_mask: am1,
                    cmp_mask: cm1,
                    neg_mask: nm1,
                    offset: o1,
                    target: a,
                },
                CheckMask {
                    and_mask: am2,
                    cmp_mask: cm2,
                    neg_mask: nm2,
                    offset: o2,
                    target: b,
                },
            ) => am1 == am2 && cm1 == cm2 && nm1 == nm2 && o1 == o2 && same_target(*a, *b),
            (
                CheckMask32 {
                    and_mask: am1,
                    cmp_mask: cm1,
                    neg_mask: nm1,
                    offset: o1,
                    target: a,
                },
                CheckMask32 {
                    and_mask: am2,
                    cmp_mask: cm2,
                    neg_mask: nm2,
                    offset: o2,
                    target: b,
                },
            ) => am1 == am2 && cm1 == cm2 && nm1 == nm2 && o1 == o2 && same_target(*a, *b),
            (
                CheckByte {
                    and_mask: am1,
                    cmp_mask: cm1,
                    negate: n1,
                    offset: o1,
                    target: a,
                },
                CheckByte {
                    and_mask: am2,
                    cmp_mask: cm2,
                    negate: n2,
                    offset: o2,
                    target: b,
                },
            ) => am1 == am2 && cm1 == cm2 && n1 == n2 && o1 == o2 && same_target(*a, *b),
            (
                CheckInfix {
                    queue: q1,
                    lag: l1,
                    report: r1,
                    target: a,
                },
                CheckInfix {
                    queue: q2,
                    lag: l2,
                    report: r2,
                    target: b,
                },
            )
            | (
                CheckPrefix {
                    queue: q1,
                    lag: l1,
                    report: r1,
                    target: a,
                },
                CheckPrefix {
                    queue: q2,
                    lag: l2,
                    report: r2,
                    target: b,
                },
            ) => q1 == q2 && l1 == l2 && r1 == r2 && same_target(*a, *b),
            (
                PushDelayed {
                    delay: d1,
                    index: i1,
                },
                PushDelayed {
                    delay: d2,
                    index: i2,
                },
            ) => d1 == d2 && i1 == i2,
            (RecordAnchored { id: i1 }, RecordAnchored { id: i2 })
            | (EnginesEod { id: i1 }, EnginesEod { id: i2 }) => i1 == i2,
            (CatchUp, CatchUp)
            | (CatchUpMpv, CatchUpMpv)
            | (SomZero, SomZero)
            | (SuffixesEod, SuffixesEod)
            | (MatcherEod, MatcherEod)
            | (End, End) => true,
            (SomAdjust { distance: d1 }, SomAdjust { distance: d2 }) => d1 == d2,
            (
                SomLeftfix { queue: q1, lag: l1 },
                SomLeftfix { queue: q2, lag: l2 },
            ) => q1 == q2 && l1 == l2,
            (SomFromReport { som: s1 }, SomFromReport { som: s2 }) => s1 == s2,
            (
                TriggerInfix {
                    queue: q1,
                    event: e1,
                    cancel: c1,
                },
                TriggerInfix {
                    queue: q2,
                    event: e2,
                    cancel: c2,
                },
            ) => q1 == q2 && e1 == e2 && c1 == c2,
            (
                TriggerSuffix { queue: q1, event: e1 },
                TriggerSuffix { queue: q2, event: e2 },
            ) => q1 == q2 && e1 == e2,
            (
                Dedupe {
                    dkey: d1,
                    offset_adjust: oa1,
                    target: a,
                },
                Dedupe {
                    dkey: d2,
                    offset_adjust: oa2,
                    target: b,
                },
            )
            | (
                DedupeSom {
                    dkey: d1,
                    offset_adjust: oa1,
                    target: a,
                },
                DedupeSom {
                    dkey: d2,
                    offset_adjust: oa2,
                    target: b,
                },
            ) => d1 == d2 && oa1 == oa2 && same_target(*a, *b),
            (
                ReportChain {
                    report: r1,
                    top_squash_distance: t1,
                },
                ReportChain {
                    report: r2,
                    top_squash_distance: t2,
                },
            ) => r1 == r2 && t1 == t2,
            (
                ReportSomInt { report: r1, som: s1 },
                ReportSomInt { report: r2, som: s2 },
            )
            | (
                ReportSomAware { report: r1, som: s1 },
                ReportSomAware { report: r2, som: s2 },
            ) => r1 == r2 && s1 == s2,
            (
                Report {
                    onmatch: om1,
                    offset_adjust: oa1,
                },
                Report {
                    onmatch: om2,
                    offset_adjust: oa2,
                },
            )
            | (
                ReportSom {
                    onmatch: om1,
                    offset_adjust: oa1,
                },
                ReportSom {
                    onmatch: om2,
                    offset_adjust: oa2,
                },
            )
            | (
                FinalReport {
                    onmatch: om1,
                    offset_adjust: oa1,
                },
                FinalReport {
                    onmatch: om2,
                    offset_adjust: oa2,
                },
            ) => om1 == om2 && oa1 == oa2,
            (
                ReportExhaust {
                    onmatch: om1,
                    offset_adjust: oa1,
                    ekey: e1,
                },
                ReportExhaust {
                    onmatch: om2,
                    offset_adjust: oa2,
                    ekey: e2,
                },
            )
            | (
                ReportSomExhaust {
                    onmatch: om1,
                    offset_adjust: oa1,
                    ekey: e1,
                },
                ReportSomExhaust {
                    onmatch: om2,
                    offset_adjust: oa2,
                    ekey: e2,
                },
            ) => om1 == om2 && oa1 == oa2 && e1 == e2,
            (
                DedupeAndReport {
                    dkey: d1,
                    onmatch: om1,
                    offset_adjust: oa1,
                    target: a,
                },
                DedupeAndReport {
                    dkey: d2,
                    onmatch: om2,
                    offset_adjust: oa2,
                    target: b,
                },
            ) => d1 == d2 && om1 == om2 && oa1 == oa2 && same_target(*a, *b),
            (
                CheckExhausted { ekey: e1, target: a },
                CheckExhausted { ekey: e2, target: b },
            ) => e1 == e2 && same_target(*a, *b),
            (
                CheckMinLength {
                    end_adjust: ea1,
                    min_length: ml1,
                    target: a,
                },
                CheckMinLength {
                    end_adjust: ea2,
                    min_length: ml2,
                    target: b,
                },
            ) => ea1 == ea2 && ml1 == ml2 && same_target(*a, *b),
            (SetState { index: i1 }, SetState { index: i2 }) => i1 == i2,
            (SetGroups { groups: g1 }, SetGroups { groups: g2 })
            | (SquashGroups { groups: g1 }, SquashGroups { groups: g2 }) => g1 == g2,
            (
                CheckState { index: i1, target: a },
                CheckState { index: i2, target: b },
            ) => i1 == i2 && same_target(*a, *b),
            (
                SparseIterBegin {
                    key_count: kc1,
                    keys: k1,
                    jump_table: jt1,
                    fallback: f1,
                },
                SparseIterBegin {
                    key_count: kc2,
                    keys: k2,
                    jump_table: jt2,
                    fallback: f2,
                },
            ) => {
                kc1 == kc2
                    && k1 == k2
                    && jt1.len() == jt2.len()
                    && jt1
                        .iter()
                        .zip(jt2.iter())
                        .all(|(e1, e2)| e1.key_index == e2.key_index && same_target(e1.target, e2.target))
                    && same_target(*f1, *f2)
            }
            (
                SparseIterNext {
                    begin: b1,
                    fallback: f1,
                },
                SparseIterNext {
                    begin: b2,
                    fallback: f2,
                },
            ) => same_target(*b1, *b2) && same_target(*f1, *f2),
            (
                SparseIterAny {
                    key_count: kc1,
                    keys: k1,
                    target: a,
                },
                SparseIterAny {
                    key_count: kc2,
                    keys: k2,
                    target: b,
                },
            ) => kc1 == kc2 && k1 == k2 && same_target(*a, *b),
            _ => false,
        }
    }

    /// Write this instruction's packed record into `dest` (which must be exactly
    /// [`Self::byte_length`] bytes), resolving target fields through `offsets` and appending any
    /// side payloads (sparse iterator bit-vectors and jump tables) to `blob`.
    ///
    /// `self_ref` is this instruction's own handle, used only to attribute errors.
    pub fn emit(
        &self,
        dest: &mut [u8],
        blob: &mut Blob,
        offsets: &OffsetMap,
        self_ref: InstRef,
        encoder: &dyn MultibitEncoder,
        shared_iters: &mut SharedIterOffsets,
    ) -> Result<()> {
        debug_assert_eq!(dest.len(), self.byte_length());
        let opcode = self.opcode();
        let mut w = RecordWriter::new(dest);
        w.put1(opcode.wire_value());

        let target_offset = |t: InstRef| require_offset(offsets, t, self_ref, opcode);

        use Instruction::*;
        match self {
            AnchoredDelay { target } | CheckOnlyEod { target } => {
                w.put4(target_offset(*target)?);
            }
            CheckLitEarly { min_offset, target } => {
                w.put4(*min_offset);
                w.put4(target_offset(*target)?);
            }
            CheckGroups { groups, target } => {
                w.put8(*groups);
                w.put4(target_offset(*target)?);
            }
            CheckBounds { min, max, target } => {
                w.put8(*min);
                w.put8(*max);
                w.put4(target_offset(*target)?);
            }
            CheckNotHandled { key, target } => {
                w.put4(*key);
                w.put4(target_offset(*target)?);
            }
            CheckLookaround { index, count, target } => {
                w.put4(*index);
                w.put4(*count);
                w.put4(target_offset(*target)?);
            }
            CheckMask {
                and_mask,
                cmp_mask,
                neg_mask,
                offset,
                target,
            } => {
                w.put8(*and_mask);
                w.put8(*cmp_mask);
                w.put8(*neg_mask);
                w.put_i32(*offset);
                w.put4(target_offset(*target)?);
            }
            CheckMask32 {
                and_mask,
                cmp_mask,
                neg_mask,
                offset,
                target,
            } => {
                w.put_bytes(and_mask);
                w.put_bytes(cmp_mask);
                w.put4(*neg_mask);
                w.put_i32(*offset);
                w.put4(target_offset(*target)?);
            }
            CheckByte {
                and_mask,
                cmp_mask,
                negate,
                offset,
                target,
            } => {
                w.put1(*and_mask);
                w.put1(*cmp_mask);
                w.put1(*negate as u8);
                w.put_i32(*offset);
                w.put4(target_offset(*target)?);
            }
            CheckInfix {
                queue,
                lag,
                report,
                target,
            }
            | CheckPrefix {
                queue,
                lag,
                report,
                target,
            } => {
                w.put4(*queue);
                w.put4(*lag);
                w.put4(*report);
                w.put4(target_offset(*target)?);
            }
            PushDelayed { delay, index } => {
                check_width(opcode, "delay", *delay as u64, 4)?;
                w.put1(*delay);
                w.put4(*index);
            }
            RecordAnchored { id } | EnginesEod { id } => {
                w.put4(*id);
            }
            CatchUp | CatchUpMpv | SomZero | SuffixesEod | MatcherEod | End => {}
            SomAdjust { distance } => {
                w.put4(*distance);
            }
            SomLeftfix { queue, lag } => {
                w.put4(*queue);
                w.put4(*lag);
            }
            SomFromReport { som } => {
                w.put4(*som);
            }
            TriggerInfix { queue, event, cancel } => {
                check_width(opcode, "event", *event as u64, 3)?;
                w.put4(*queue);
                w.put1(*event);
                w.put1(*cancel as u8);
            }
            TriggerSuffix { queue, event } => {
                check_width(opcode, "event", *event as u64, 3)?;
                w.put4(*queue);
                w.put1(*event);
            }
            Dedupe {
                dkey,
                offset_adjust,
                target,
            }
            | DedupeSom {
                dkey,
                offset_adjust,
                target,
            } => {
                w.put4(*dkey);
                w.put_i32(*offset_adjust);
                w.put4(target_offset(*target)?);
            }
            ReportChain {
                report,
                top_squash_distance,
            } => {
                w.put4(*report);
                w.put4(*top_squash_distance);
            }
            ReportSomInt { report, som } | ReportSomAware { report, som } => {
                w.put4(*report);
                w.put4(*som);
            }
            Report {
                onmatch,
                offset_adjust,
            }
            | ReportSom {
                onmatch,
                offset_adjust,
            }
            | FinalReport {
                onmatch,
                offset_adjust,
            } => {
                w.put4(*onmatch);
                w.put_i32(*offset_adjust);
            }
            ReportExhaust {
                onmatch,
                offset_adjust,
                ekey,
            }
            | ReportSomExhaust {
                onmatch,
                offset_adjust,
                ekey,
            } => {
                w.put4(*onmatch);
                w.put_i32(*offset_adjust);
                w.put4(*ekey);
            }
            DedupeAndReport {
                dkey,
                onmatch,
                offset_adjust,
                target,
            } => {
                w.put4(*dkey);
                w.put4(*onmatch);
                w.put_i32(*offset_adjust);
                w.put4(target_offset(*target)?);
            }
            CheckExhausted { ekey, target } => {
                w.put4(*ekey);
                w.put4(target_offset(*target)?);
            }
            CheckMinLength {
                end_adjust,
                min_length,
                target,
            } => {
                w.put_i32(*end_adjust);
                w.put8(*min_length);
                w.put4(target_offset(*target)?);
            }
            SetState { index } => {
                w.put4(*index);
            }
            SetGroups { groups } | SquashGroups { groups } => {
                w.put8(*groups);
            }
            CheckState { index, target } => {
                w.put4(*index);
                w.put4(target_offset(*target)?);
            }
            SparseIterBegin {
                key_count,
                keys,
                jump_table,
                fallback,
            } => {
                let iter_offset = encoder.encode(keys, *key_count, blob)?;
                let jt_offset = write_jump_table(jump_table, offsets, self_ref, opcode, blob)?;
                shared_iters.insert(self_ref, (iter_offset, jt_offset));
                w.put4(iter_offset);
                w.put4(jt_offset);
                w.put4(*key_count);
                w.put4(jump_table.len() as u32);
                w.put4(target_offset(*fallback)?);
            }
            SparseIterNext { begin, fallback } => {
                let (iter_offset, jt_offset) =
                    shared_iters
                        .get(begin)
                        .copied()
                        .ok_or(Error::SparseIterNextBeforeBegin {
                            next: self_ref,
                            begin: *begin,
                        })?;
                w.put4(iter_offset);
                w.put4(jt_offset);
                w.put4(target_offset(*fallback)?);
            }
            SparseIterAny { key_count, keys, target } => {
                let iter_offset = encoder.encode(keys, *key_count, blob)?;
                w.put4(iter_offset);
                w.put4(*key_count);
                w.put4(target_offset(*target)?);
            }
        }
        Ok(())
    }
}

fn write_jump_table(
    jump_table: &[JumpEntry],
    offsets: &OffsetMap,
    owner: InstRef,
    opcode: OpCode,
    blob: &mut Blob,
) -> Result<u32> {
    let mut bytes = Vec::with_capacity(jump_table.len() * 8);
    for entry in jump_table {
        let target_offset = require_offset(offsets, entry.target, owner, opcode)?;
        bytes.extend_from_slice(&entry.key_index.to_le_bytes());
        bytes.extend_from_slice(&target_offset.to_le_bytes());
    }
    blob.write_aligned(&bytes, 4)
}
