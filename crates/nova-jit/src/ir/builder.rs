use nova_types::Width;

use super::ids::{BlockId, InstrId, LocalId, ValueId};
use super::instr::Opcode;
use super::unit::IrUnit;

/// Ergonomic facade over [`IrUnit`] for guest frontends. Every method here is a thin wrapper that
/// ends up calling `IrUnit::append`/`set_arg`, so the invariants in `spec.md` §3 hold by
/// construction: a frontend cannot build an instruction with a dangling argument slot.
pub struct IrBuilder {
    pub unit: IrUnit,
    pub entry: BlockId,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        let mut unit = IrUnit::new();
        let entry = unit.alloc_block();
        unit.set_insert_point(entry);
        IrBuilder { unit, entry }
    }

    /// Recycles the builder for a new block translation, per `spec.md` §4.2's arena-reuse note.
    pub fn reset(&mut self) {
        self.unit.reset();
        self.entry = self.unit.alloc_block();
        self.unit.set_insert_point(self.entry);
    }

    pub fn new_block(&mut self) -> BlockId {
        self.unit.alloc_block()
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        self.unit.set_insert_point(block);
    }

    pub fn const_int(&mut self, width: Width, value: u64) -> ValueId {
        self.unit.alloc_const(width, value)
    }

    pub fn const_f32(&mut self, value: f32) -> ValueId {
        self.unit.alloc_const(Width::F32, value.to_bits() as u64)
    }

    pub fn const_f64(&mut self, value: f64) -> ValueId {
        self.unit.alloc_const(Width::F64, value.to_bits())
    }

    /// A constant carrying `block`'s arena index, used as the operand of branch instructions
    /// (`spec.md` §3: `block_ref` is one of the IR value kinds).
    pub fn block_ref(&mut self, block: BlockId) -> ValueId {
        self.unit.alloc_const(Width::BlockRef, block.0 as u64)
    }

    pub fn load_context(&mut self, offset: u32, width: Width) -> ValueId {
        let (_, result) = self.unit.append(Opcode::LoadContext { offset, width }, width);
        result.expect("load_context always yields a result")
    }

    pub fn store_context(&mut self, offset: u32, width: Width, value: ValueId) -> InstrId {
        let (instr, _) = self
            .unit
            .append(Opcode::StoreContext { offset, width }, Width::Void);
        self.unit.set_arg(instr, 0, value);
        instr
    }

    pub fn load_local(&mut self, local: LocalId, width: Width) -> ValueId {
        let (_, result) = self.unit.append(Opcode::LoadLocal { local, width }, width);
        result.expect("load_local always yields a result")
    }

    pub fn store_local(&mut self, local: LocalId, width: Width, value: ValueId) -> InstrId {
        let (instr, _) = self.unit.append(Opcode::StoreLocal { local, width }, Width::Void);
        self.unit.set_arg(instr, 0, value);
        instr
    }

    pub fn load_mem(&mut self, addr: ValueId, width: Width) -> ValueId {
        let (instr, result) = self.unit.append(Opcode::LoadMem { width }, width);
        self.unit.set_arg(instr, 0, addr);
        result.expect("load_mem always yields a result")
    }

    pub fn store_mem(&mut self, addr: ValueId, width: Width, value: ValueId) -> InstrId {
        let (instr, _) = self.unit.append(Opcode::StoreMem { width }, Width::Void);
        self.unit.set_arg(instr, 0, addr);
        self.unit.set_arg(instr, 1, value);
        instr
    }

    fn binop(&mut self, opcode: Opcode, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        let (instr, result) = self.unit.append(opcode, width);
        self.unit.set_arg(instr, 0, lhs);
        self.unit.set_arg(instr, 1, rhs);
        result.expect("binops always yield a result")
    }

    pub fn add(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Add, width, lhs, rhs)
    }
    pub fn sub(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Sub, width, lhs, rhs)
    }
    pub fn umul(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::UMul, width, lhs, rhs)
    }
    pub fn udiv(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::UDiv, width, lhs, rhs)
    }
    pub fn and(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::And, width, lhs, rhs)
    }
    pub fn or(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Or, width, lhs, rhs)
    }
    pub fn xor(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Xor, width, lhs, rhs)
    }
    pub fn shl(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Shl, width, lhs, rhs)
    }
    pub fn lshr(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Lshr, width, lhs, rhs)
    }
    pub fn ashr(&mut self, width: Width, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binop(Opcode::Ashr, width, lhs, rhs)
    }

    fn unop(&mut self, opcode: Opcode, width: Width, v: ValueId) -> ValueId {
        let (instr, result) = self.unit.append(opcode, width);
        self.unit.set_arg(instr, 0, v);
        result.expect("unops always yield a result")
    }

    pub fn not(&mut self, width: Width, v: ValueId) -> ValueId {
        self.unop(Opcode::Not, width, v)
    }
    pub fn neg(&mut self, width: Width, v: ValueId) -> ValueId {
        self.unop(Opcode::Neg, width, v)
    }

    pub fn assert_eq(&mut self, a: ValueId, b: ValueId) -> InstrId {
        let (instr, _) = self.unit.append(Opcode::AssertEq, Width::Void);
        self.unit.set_arg(instr, 0, a);
        self.unit.set_arg(instr, 1, b);
        instr
    }

    pub fn source_info(&mut self, guest_pc: u64, cycles: u32) -> InstrId {
        let (instr, _) = self
            .unit
            .append(Opcode::SourceInfo { guest_pc, cycles }, Width::Void);
        instr
    }

    pub fn fallback(&mut self, callback: u32, raw_instr: u32, sets_pc: bool) -> InstrId {
        let (instr, _) = self.unit.append(
            Opcode::Fallback {
                callback,
                raw_instr,
                sets_pc,
            },
            Width::Void,
        );
        instr
    }

    pub fn branch(&mut self, target: BlockId) -> InstrId {
        let target_ref = self.block_ref(target);
        let (instr, _) = self.unit.append(Opcode::Branch, Width::Void);
        self.unit.set_arg(instr, 0, target_ref);
        self.unit.add_edge(self.unit.current_block(), target);
        instr
    }

    pub fn branch_true(&mut self, cond: ValueId, target: BlockId) -> InstrId {
        let target_ref = self.block_ref(target);
        let (instr, _) = self.unit.append(Opcode::BranchTrue, Width::Void);
        self.unit.set_arg(instr, 0, cond);
        self.unit.set_arg(instr, 1, target_ref);
        self.unit.add_edge(self.unit.current_block(), target);
        instr
    }

    pub fn branch_false(&mut self, cond: ValueId, target: BlockId) -> InstrId {
        let target_ref = self.block_ref(target);
        let (instr, _) = self.unit.append(Opcode::BranchFalse, Width::Void);
        self.unit.set_arg(instr, 0, cond);
        self.unit.set_arg(instr, 1, target_ref);
        self.unit.add_edge(self.unit.current_block(), target);
        instr
    }

    pub fn alloc_local(&mut self, width: Width, offset: u32) -> LocalId {
        self.unit.alloc_local(width, offset)
    }

    /// Captures the current insert position, narrows it to "before the next instruction about to
    /// be appended", and returns the saved position so the caller can restore it after splicing a
    /// delay slot's translation in (`spec.md` §4.3).
    pub fn open_delay_slot_splice_point(&mut self) -> Option<usize> {
        let pos = self.unit.next_insert_index();
        self.unit.set_insert_pos(pos)
    }

    pub fn close_delay_slot_splice_point(&mut self, saved: Option<usize>) {
        self.unit.restore_insert_pos(saved);
    }
}
