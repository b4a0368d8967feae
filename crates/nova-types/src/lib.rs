//! Fundamental value and opcode-flag types shared by the translation engine
//! ([`nova-jit`](../nova_jit/index.html)) and the runtime driver
//! ([`nova-runtime`](../nova_runtime/index.html)).
//!
//! Nothing here is guest-specific: widths, the IR's value-kind lattice, and
//! the opcode-flag bits a frontend attaches to a decoded guest instruction.

use bitflags::bitflags;

/// IR value kind. Every [`Value`](https://docs.rs/nova-jit) in the engine carries exactly one of
/// these; integer and floating kinds have full width equal to the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Void,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// 4-lane, 32-bit-per-lane packed value.
    V128,
    /// A reference to another IR block, used only by control-flow instructions.
    BlockRef,
}

impl Width {
    /// Size in bytes, or `None` for [`Width::Void`] and [`Width::BlockRef`] which have no storage
    /// representation in guest memory.
    pub fn bytes(self) -> Option<u32> {
        match self {
            Width::Void | Width::BlockRef => None,
            Width::I8 => Some(1),
            Width::I16 => Some(2),
            Width::I32 | Width::F32 => Some(4),
            Width::I64 | Width::F64 => Some(8),
            Width::V128 => Some(16),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Width::I8 | Width::I16 | Width::I32 | Width::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Width::F32 | Width::F64)
    }
}

bitflags! {
    /// Per-opcode flags a guest frontend's decode table attaches to a raw instruction word.
    ///
    /// These drive the block-extent analysis in `nova_jit::frontend` and the delay-slot /
    /// specialisation handling in the translator; see `spec.md` §4.3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u32 {
        /// Instruction (possibly) writes the guest program counter; a block-extent terminator.
        const SET_PC = 1 << 0;
        /// Instruction stores to a guest mode/control register whose value affects how later
        /// instructions must be translated (e.g. an FPU precision bit); also a terminator for
        /// guests that require it (the superscalar guest's `STORE_FPSCR`).
        const STORE_MODE = 1 << 1;
        /// Instruction occupies a delay slot: it executes *after* the preceding branch resolves
        /// its target but *before* control transfers. Delay instructions may not themselves be
        /// flagged `DELAYED`.
        const DELAYED = 1 << 2;
        /// No native translator exists (or one is deliberately withheld); always lowered to a
        /// `FALLBACK` IR instruction that calls the guest's interpreter callback.
        const FALLBACK = 1 << 3;
    }
}

/// Role an allocatable host register plays, used by the backend's register descriptor table
/// (`spec.md` §4.5) to decide which registers `ra` may hand out freely versus which it must
/// preserve across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegRole {
    CallerSave,
    CalleeSave,
    Reserved,
}

/// Which of the three independent allocatable-register partitions (`spec.md` §4.4.5) a value's
/// type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Int,
    Float,
    Vector,
}

impl RegClass {
    pub fn of(width: Width) -> Option<RegClass> {
        match width {
            Width::I8 | Width::I16 | Width::I32 | Width::I64 => Some(RegClass::Int),
            Width::F32 | Width::F64 => Some(RegClass::Float),
            Width::V128 => Some(RegClass::Vector),
            Width::Void | Width::BlockRef => None,
        }
    }
}
