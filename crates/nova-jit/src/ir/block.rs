use super::ids::{EdgeId, InstrId};

/// Maximal straight-line sequence of guest instructions ending in a branch, fallback that sets
/// PC, or explicit PC store. `instrs` is ordered; the last entry is always the terminator once
/// [`super::builder::IrBuilder::finish_block`] has run.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub instrs: Vec<InstrId>,
    pub incoming: Vec<EdgeId>,
    pub outgoing: Vec<EdgeId>,
}
