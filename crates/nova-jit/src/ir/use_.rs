use super::ids::{InstrId, ValueId};

/// Indirection between an instruction's argument slot and the value it reads.
///
/// `pos` is the use's own index into the owning [`super::value::Value`]'s `uses` vector; it lets
/// removal be O(1) (swap-remove) instead of a linear scan, which is how this port realises the
/// "uses as first-class nodes" design from `spec.md` §3 without an intrusive linked list.
#[derive(Debug, Clone, Copy)]
pub struct Use {
    pub value: ValueId,
    pub instr: InstrId,
    pub slot: u8,
    pub pos: u32,
}
