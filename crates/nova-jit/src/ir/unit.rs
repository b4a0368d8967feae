use std::collections::HashMap;

use nova_types::Width;

use super::block::Block;
use super::edge::Edge;
use super::ids::{BlockId, EdgeId, InstrId, LocalId, UseId, ValueId};
use super::instr::{Instruction, Opcode};
use super::local::Local;
use super::use_::Use;
use super::value::{MetaTag, Value};

/// Key for the flat, index-keyed replacement of the source engine's raw-pointer-keyed metadata
/// hashtables (`spec.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    Value(ValueId),
    Instr(InstrId),
    Block(BlockId),
}

/// Owns every IR node for the translation of a single guest block.
///
/// All of `values`, `instrs`, `blocks`, `uses`, `edges` and `locals` are arena `Vec`s standing in
/// for the source's single bump arena (`spec.md` §3): nodes are appended, never individually
/// freed, and the whole unit is recycled with [`IrUnit::reset`] between block translations rather
/// than reallocated.
#[derive(Debug, Default)]
pub struct IrUnit {
    pub(crate) values: Vec<Value>,
    pub(crate) instrs: Vec<Instruction>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) uses: Vec<Use>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) locals: Vec<Local>,
    meta: HashMap<MetaKey, MetaTag>,
    /// Current insertion point: append new instructions to the end of this block's `instrs`,
    /// unless [`IrUnit::insert_pos`] narrows it further.
    pub(crate) insert_block: Option<BlockId>,
    /// Index within `insert_block`'s `instrs` to insert *before*. `None` means "append at the
    /// end". Used to splice a delay slot's translation into the middle of the branch
    /// instruction's already-emitted expansion (`spec.md` §4.3).
    pub(crate) insert_pos: Option<usize>,
}

impl IrUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recycle the arena for a new block translation. `spec.md` §3: "The IR arena is never freed
    /// piecewise; `used` monotonically increases until the whole unit is reset."
    pub fn reset(&mut self) {
        self.values.clear();
        self.instrs.clear();
        self.blocks.clear();
        self.uses.clear();
        self.edges.clear();
        self.locals.clear();
        self.meta.clear();
        self.insert_block = None;
        self.insert_pos = None;
    }

    // ---- allocation -----------------------------------------------------

    pub fn alloc_const(&mut self, width: Width, bits: u64) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::constant(width, bits));
        id
    }

    /// Allocates a value defined by `instr`; does not touch `instr.result` — callers building a
    /// new instruction should prefer [`IrUnit::append`], which wires the two together.
    fn alloc_def_value(&mut self, width: Width, instr: InstrId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::defined_by(width, instr));
        id
    }

    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    pub fn alloc_local(&mut self, width: Width, offset: u32) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(Local { width, offset });
        id
    }

    /// Appends `opcode` at the current insert point, allocating a result value if the opcode
    /// produces one. Returns `(instr, result)`.
    pub fn append(
        &mut self,
        opcode: Opcode,
        result_width: Width,
    ) -> (InstrId, Option<ValueId>) {
        let block = self.insert_block.expect("no insert point set");
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(Instruction::new(opcode, block));

        let result = if opcode.has_result() {
            Some(self.alloc_def_value(result_width, id))
        } else {
            None
        };
        self.instrs[id.index()].result = result;

        match self.insert_pos {
            Some(pos) => {
                self.blocks[block.index()].instrs.insert(pos, id);
                self.insert_pos = Some(pos + 1);
            }
            None => self.blocks[block.index()].instrs.push(id),
        }
        (id, result)
    }

    /// Writes `value` into `instr`'s argument `slot`, registering a [`Use`]. If the slot already
    /// held a different value, that use is removed first. `spec.md` §3: "writing `*use.parg = v`
    /// and fixing up use-lists is the only legal way to substitute."
    pub fn set_arg(&mut self, instr: InstrId, slot: u8, value: ValueId) {
        if let Some(old) = self.instrs[instr.index()].args[slot as usize] {
            self.remove_use(instr, slot, old);
        }
        self.instrs[instr.index()].args[slot as usize] = Some(value);
        self.add_use(instr, slot, value);
    }

    fn add_use(&mut self, instr: InstrId, slot: u8, value: ValueId) {
        let use_id = UseId(self.uses.len() as u32);
        let pos = self.values[value.index()].uses.len() as u32;
        self.uses.push(Use {
            value,
            instr,
            slot,
            pos,
        });
        self.values[value.index()].uses.push(use_id);
    }

    fn remove_use(&mut self, instr: InstrId, slot: u8, value: ValueId) {
        let Some(pos) = self.values[value.index()]
            .uses
            .iter()
            .position(|&u| {
                let u = &self.uses[u.index()];
                u.instr == instr && u.slot == slot
            })
        else {
            return;
        };
        self.values[value.index()].uses.swap_remove(pos);
        if let Some(&moved) = self.values[value.index()].uses.get(pos) {
            self.uses[moved.index()].pos = pos as u32;
        }
    }

    /// Removes `instr` from its block's instruction list and releases every use it held. The
    /// instruction's node stays in the arena (never freed piecewise) but is no longer reachable
    /// from any block, and if it had a result with no remaining uses that value is simply inert.
    pub fn remove_instr(&mut self, instr: InstrId) {
        let block = self.instrs[instr.index()].block;
        self.blocks[block.index()].instrs.retain(|&i| i != instr);
        let args = self.instrs[instr.index()].args;
        for (slot, arg) in args.iter().enumerate() {
            if let Some(value) = arg {
                self.remove_use(instr, slot as u8, *value);
            }
        }
        self.instrs[instr.index()].args = [None, None, None];
    }

    /// Rewrites every use of `old` to read `new` instead, per `spec.md` §4.2: "Replacement must
    /// update every use's argument slot and transplant the use nodes to the new value's use
    /// list." Runs in O(uses of `old`).
    pub fn replace_value(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.values[old.index()].uses);
        for use_id in uses {
            let (instr, slot) = {
                let u = &self.uses[use_id.index()];
                (u.instr, u.slot)
            };
            self.instrs[instr.index()].args[slot as usize] = Some(new);
            let new_pos = self.values[new.index()].uses.len() as u32;
            self.uses[use_id.index()] = Use {
                value: new,
                instr,
                slot,
                pos: new_pos,
            };
            self.values[new.index()].uses.push(use_id);
        }
    }

    /// Stamps `instr`'s linearisation ordinal, assigned by `ra`'s preparation step (`spec.md`
    /// §4.4.5).
    pub fn set_ordinal(&mut self, instr: InstrId, ordinal: u32) {
        self.instrs[instr.index()].ordinal = Some(ordinal);
    }

    /// Stamps `value`'s allocated host register, or clears it back to `None` when spilled.
    pub fn set_reg(&mut self, value: ValueId, reg: Option<u32>) {
        self.values[value.index()].reg = reg;
    }

    /// Rewrites a `SourceInfo` marker's cycle count in place, used by idle-loop detection to scale
    /// a block's cycle cost after the fact (`spec.md` §4.3) without having to rebuild the block.
    pub fn set_source_info_cycles(&mut self, instr: InstrId, guest_pc: u64, cycles: u32) {
        if let Opcode::SourceInfo { .. } = self.instrs[instr.index()].opcode {
            self.instrs[instr.index()].opcode = Opcode::SourceInfo { guest_pc, cycles };
        }
    }

    pub fn add_edge(&mut self, src: BlockId, dst: BlockId) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { src, dst });
        self.blocks[src.index()].outgoing.push(id);
        self.blocks[dst.index()].incoming.push(id);
        id
    }

    // ---- accessors --------------------------------------------------------

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.index()]
    }

    pub fn locals_len(&self) -> usize {
        self.locals.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn set_meta(&mut self, key: MetaKey, tag: MetaTag) {
        self.meta.insert(key, tag);
    }

    pub fn meta(&self, key: MetaKey) -> MetaTag {
        self.meta.get(&key).copied().unwrap_or_default()
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        self.insert_block = Some(block);
        self.insert_pos = None;
    }

    /// Narrows the insert point to "before instruction index `pos` of the current block",
    /// returning the previous insert position so callers can restore it. Used to splice a delay
    /// slot's translation into the middle of the branch's expansion.
    pub fn set_insert_pos(&mut self, pos: usize) -> Option<usize> {
        std::mem::replace(&mut self.insert_pos, Some(pos))
    }

    pub fn restore_insert_pos(&mut self, pos: Option<usize>) {
        self.insert_pos = pos;
    }

    pub fn current_block(&self) -> BlockId {
        self.insert_block.expect("no insert point set")
    }

    /// Index the current block's instruction list will have at the *next* append, useful for
    /// capturing "insert point in the middle" per `spec.md` §4.3's delay-slot handling.
    pub fn next_insert_index(&self) -> usize {
        match self.insert_pos {
            Some(pos) => pos,
            None => self.blocks[self.current_block().index()].instrs.len(),
        }
    }
}
