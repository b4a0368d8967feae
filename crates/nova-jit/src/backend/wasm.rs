//! Assembles an [`IrUnit`] into a wasm module: one exported function per IR block, plus the
//! imports a host runtime must supply (guest memory, guest context, and the four runtime
//! callbacks from `spec.md` §4.1). `spec.md` §4.5's `assemble_code` becomes [`WasmBackend::assemble`].
//!
//! Each block function has signature `() -> i32`: on return it yields either the table index of
//! the block to dispatch to next, or `-1` meaning "fell through to a fallback that needs the
//! runtime to re-decode". This stands in for the source engine's tail-jump thunks, which a wasm
//! function body cannot emit directly — the runtime driver's dispatch loop (`nova-runtime`)
//! performs the actual `call_indirect` in their place.

use std::collections::HashMap;

use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemArg, MemoryType, Module, TypeSection, ValType,
};

use nova_types::Width;

use crate::error::BackendError;
use crate::ir::{BlockId, IrUnit, Opcode, ValueId};

/// Emitted once per compiled block and once per guest instruction within it, mirroring the
/// source's `emit_cb(JIT_EMIT_BLOCK/INSTR, ...)` (`spec.md` §4.5). The JIT driver uses these to
/// build its guest-PC-to-block reverse map.
#[derive(Debug, Clone, Copy)]
pub enum EmitEvent {
    Block { block: BlockId, table_index: u32 },
    Instr { guest_pc: u64, table_index: u32 },
}

/// The wasm module bytes for one translation unit, plus the events the driver needs to update its
/// reverse map and dispatcher table.
pub struct AssembledBlock {
    pub module: Vec<u8>,
    pub events: Vec<EmitEvent>,
    /// `block_ids()[i]` is exported as function index `i`, i.e. table index `i`.
    pub block_table_indices: Vec<(BlockId, u32)>,
}

fn val_type(width: Width) -> ValType {
    match width {
        Width::I8 | Width::I16 | Width::I32 => ValType::I32,
        Width::I64 => ValType::I64,
        Width::F32 => ValType::F32,
        Width::F64 => ValType::F64,
        Width::V128 => ValType::V128,
        Width::Void | Width::BlockRef => ValType::I32,
    }
}

/// Maps a register-allocated value to a wasm local index. Registers are partitioned the same way
/// `ra`'s [`crate::passes::RegisterFile`] partitions physical registers, so class + index is
/// enough to pick a disjoint local slot: ints start at 0, floats after all ints, vectors after
/// floats.
pub struct LocalLayout {
    pub int_count: u32,
    pub float_count: u32,
    pub vector_count: u32,
}

impl LocalLayout {
    fn local_index(&self, width: Width, reg: u32) -> u32 {
        match width {
            Width::I8 | Width::I16 | Width::I32 | Width::I64 => reg,
            Width::F32 | Width::F64 => self.int_count + reg,
            Width::V128 => self.int_count + self.float_count + reg,
            Width::Void | Width::BlockRef => reg,
        }
    }
}

pub struct WasmBackend;

impl WasmBackend {
    pub fn new() -> Self {
        WasmBackend
    }

    /// Assembles every block in `unit` into one wasm module. `ctx_memory_pages`/`guest_memory_pages`
    /// size the two imported linear memories (guest context and guest address space respectively).
    pub fn assemble(
        &self,
        unit: &IrUnit,
        layout: &LocalLayout,
    ) -> Result<AssembledBlock, BackendError> {
        let mut types = TypeSection::new();
        let block_type_idx = 0u32;
        types.function([], [ValType::I32]);
        let fallback_type_idx = 1u32;
        types.function([ValType::I32, ValType::I32, ValType::I32], []);

        fn linear_memory() -> MemoryType {
            MemoryType {
                minimum: 1,
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            }
        }

        let mut imports = ImportSection::new();
        imports.import("env", "ctx", EntityType::Memory(linear_memory()));
        imports.import("env", "mem", EntityType::Memory(linear_memory()));
        imports.import("env", "spill", EntityType::Memory(linear_memory()));
        imports.import("env", "fallback", EntityType::Function(fallback_type_idx));

        let mut functions = FunctionSection::new();
        let mut code = CodeSection::new();
        let mut events = Vec::new();

        // Table indices for every block must be known before any block body is assembled, since a
        // branch can target a block that comes later in `unit.block_ids()` order.
        let imported_func_count = 1u32;
        let block_table_indices: Vec<(BlockId, u32)> = unit
            .block_ids()
            .enumerate()
            .map(|(i, block)| (block, imported_func_count + i as u32))
            .collect();
        let block_index_of: HashMap<BlockId, u32> = block_table_indices.iter().copied().collect();

        for (i, &(block, table_index)) in block_table_indices.iter().enumerate() {
            events.push(EmitEvent::Block {
                block,
                table_index,
            });

            let fallthrough = block_table_indices.get(i + 1).map(|&(_, idx)| idx);
            functions.function(block_type_idx);
            let func = self.assemble_block(
                unit,
                block,
                layout,
                &mut events,
                table_index,
                &block_index_of,
                fallthrough,
            )?;
            code.function(&func);
        }

        let mut exports = ExportSection::new();
        for &(block, table_index) in &block_table_indices {
            exports.export(&format!("block_{}", block.0), ExportKind::Func, table_index);
        }

        let mut module = Module::new();
        module.section(&types);
        module.section(&imports);
        module.section(&functions);
        module.section(&exports);
        module.section(&code);

        let bytes = module.finish();
        if bytes.len() > super::MAX_MODULE_BYTES {
            return Err(BackendError::CodeBufferExhausted);
        }

        Ok(AssembledBlock {
            module: bytes,
            events,
            block_table_indices,
        })
    }

    fn assemble_block(
        &self,
        unit: &IrUnit,
        block: BlockId,
        layout: &LocalLayout,
        events: &mut Vec<EmitEvent>,
        table_index: u32,
        block_index_of: &HashMap<BlockId, u32>,
        fallthrough: Option<u32>,
    ) -> Result<Function, BackendError> {
        // Every register-allocated value becomes a wasm local; the function has no params, so
        // these are declared up front and indexed the same way `LocalLayout::local_index` does.
        let mut locals: Vec<(u32, ValType)> = Vec::new();
        if layout.int_count > 0 {
            locals.push((layout.int_count, ValType::I32));
        }
        if layout.float_count > 0 {
            locals.push((layout.float_count, ValType::F64));
        }
        if layout.vector_count > 0 {
            locals.push((layout.vector_count, ValType::V128));
        }
        let mut f = Function::new(locals);

        // Whether the terminator already pushed this function's i32 return value onto the stack.
        let mut terminated = false;
        for &instr_id in &unit.block(block).instrs {
            let instr = unit.instr(instr_id);
            match instr.opcode {
                Opcode::SourceInfo { guest_pc, .. } => {
                    events.push(EmitEvent::Instr {
                        guest_pc,
                        table_index,
                    });
                }
                Opcode::LoadContext { offset, width } => {
                    self.emit_load(&mut f, "ctx", offset, width);
                    self.emit_local_set(&mut f, layout, unit, instr.result);
                }
                Opcode::StoreContext { offset, width } => {
                    f.instructions().i32_const(0);
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    self.emit_store(&mut f, "ctx", offset, width);
                }
                Opcode::LoadMem { width } => {
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    self.emit_load_indexed(&mut f, width);
                    self.emit_local_set(&mut f, layout, unit, instr.result);
                }
                Opcode::StoreMem { width } => {
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    self.emit_local_get(&mut f, layout, unit, instr.args[1]);
                    self.emit_store_indexed(&mut f, width);
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::UMul
                | Opcode::UDiv
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Lshr
                | Opcode::Ashr => {
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    self.emit_local_get(&mut f, layout, unit, instr.args[1]);
                    let width = instr.result.map(|r| unit.value(r).width).unwrap_or(Width::I32);
                    self.emit_binop(&mut f, instr.opcode, width);
                    self.emit_local_set(&mut f, layout, unit, instr.result);
                }
                Opcode::Not | Opcode::Neg => {
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    let width = instr.result.map(|r| unit.value(r).width).unwrap_or(Width::I32);
                    self.emit_unop(&mut f, instr.opcode, width);
                    self.emit_local_set(&mut f, layout, unit, instr.result);
                }
                Opcode::AssertEq => {
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    self.emit_local_get(&mut f, layout, unit, instr.args[1]);
                    f.instructions().i32_ne();
                    f.instructions().if_(wasm_encoder::BlockType::Empty);
                    f.instructions().unreachable();
                    f.instructions().end();
                }
                Opcode::Branch => {
                    let target = Self::resolve_block_target(unit, instr.args[0], block_index_of);
                    f.instructions().i32_const(target as i32);
                    terminated = true;
                }
                Opcode::BranchTrue => {
                    let target = Self::resolve_block_target(unit, instr.args[1], block_index_of);
                    let fallthrough = fallthrough
                        .expect("branch_true must be followed by its fallthrough block in the same unit");
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    f.instructions().if_(BlockType::Result(ValType::I32));
                    f.instructions().i32_const(target as i32);
                    f.instructions().else_();
                    f.instructions().i32_const(fallthrough as i32);
                    f.instructions().end();
                    terminated = true;
                }
                Opcode::BranchFalse => {
                    let target = Self::resolve_block_target(unit, instr.args[1], block_index_of);
                    let fallthrough = fallthrough
                        .expect("branch_false must be followed by its fallthrough block in the same unit");
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    f.instructions().i32_eqz();
                    f.instructions().if_(BlockType::Result(ValType::I32));
                    f.instructions().i32_const(target as i32);
                    f.instructions().else_();
                    f.instructions().i32_const(fallthrough as i32);
                    f.instructions().end();
                    terminated = true;
                }
                Opcode::Fallback { callback, raw_instr, sets_pc } => {
                    f.instructions().i32_const(callback as i32);
                    f.instructions().i32_const(raw_instr as i32);
                    f.instructions().i32_const(0);
                    f.instructions().call(0);
                    if sets_pc {
                        // A PC-setting fallback is a terminator (`Opcode::is_terminator`): the guest
                        // PC may now point anywhere, so the driver must re-dispatch from scratch.
                        f.instructions().i32_const(-1);
                        terminated = true;
                    }
                }
                Opcode::LoadLocal { local, width } => {
                    let offset = unit.local(local).offset;
                    self.emit_load_spill(&mut f, offset, width);
                    self.emit_local_set(&mut f, layout, unit, instr.result);
                }
                Opcode::StoreLocal { local, width } => {
                    let offset = unit.local(local).offset;
                    f.instructions().i32_const(0);
                    self.emit_local_get(&mut f, layout, unit, instr.args[0]);
                    self.emit_store_spill(&mut f, offset, width);
                }
            }
        }

        if !terminated {
            // Terminator synthesis guarantees every block ends in one of the arms above; this is
            // a defensive fallback only, requesting the driver re-decode from wherever the guest
            // PC actually ended up.
            f.instructions().i32_const(-1);
        }
        f.instructions().end();
        Ok(f)
    }

    /// Resolves a `Width::BlockRef` branch operand (the arena `BlockId` it carries as its constant
    /// bits) to the wasm table index `assemble` assigned that block.
    fn resolve_block_target(
        unit: &IrUnit,
        arg: Option<ValueId>,
        block_index_of: &HashMap<BlockId, u32>,
    ) -> u32 {
        let value = unit.value(arg.expect("branch instructions always carry a target operand"));
        let block = BlockId(value.const_bits().expect("branch target is a block_ref constant") as u32);
        *block_index_of
            .get(&block)
            .expect("branch target must resolve to a block assembled in this unit")
    }

    fn emit_load(&self, f: &mut Function, _memory: &str, offset: u32, width: Width) {
        let mem_arg = MemArg {
            offset: offset as u64,
            align: 2,
            memory_index: 0,
        };
        match width {
            Width::I8 => {
                f.instructions().i32_const(0);
                f.instructions().i32_load8_u(mem_arg);
            }
            Width::I16 => {
                f.instructions().i32_const(0);
                f.instructions().i32_load16_u(mem_arg);
            }
            Width::I32 | Width::F32 | Width::BlockRef | Width::Void => {
                f.instructions().i32_const(0);
                f.instructions().i32_load(mem_arg);
            }
            Width::I64 | Width::F64 => {
                f.instructions().i32_const(0);
                f.instructions().i64_load(mem_arg);
            }
            Width::V128 => {
                f.instructions().i32_const(0);
                f.instructions().i32_load(mem_arg);
            }
        }
    }

    fn emit_store(&self, f: &mut Function, _memory: &str, offset: u32, width: Width) {
        let mem_arg = MemArg {
            offset: offset as u64,
            align: 2,
            memory_index: 0,
        };
        match width {
            Width::I8 => {
                f.instructions().i32_store8(mem_arg);
            }
            Width::I16 => {
                f.instructions().i32_store16(mem_arg);
            }
            Width::I64 | Width::F64 => {
                f.instructions().i64_store(mem_arg);
            }
            _ => {
                f.instructions().i32_store(mem_arg);
            }
        }
    }

    /// Spill slots live in their own imported memory, disjoint from guest context and guest
    /// address space, keyed by the byte offset `ra` assigned the local (`spec.md` §4.4.5).
    fn emit_load_spill(&self, f: &mut Function, offset: u32, width: Width) {
        let mem_arg = MemArg {
            offset: offset as u64,
            align: 2,
            memory_index: 2,
        };
        match width {
            Width::I8 => {
                f.instructions().i32_const(0);
                f.instructions().i32_load8_u(mem_arg);
            }
            Width::I16 => {
                f.instructions().i32_const(0);
                f.instructions().i32_load16_u(mem_arg);
            }
            Width::I64 | Width::F64 => {
                f.instructions().i32_const(0);
                f.instructions().i64_load(mem_arg);
            }
            _ => {
                f.instructions().i32_const(0);
                f.instructions().i32_load(mem_arg);
            }
        }
    }

    fn emit_store_spill(&self, f: &mut Function, offset: u32, width: Width) {
        let mem_arg = MemArg {
            offset: offset as u64,
            align: 2,
            memory_index: 2,
        };
        match width {
            Width::I8 => {
                f.instructions().i32_store8(mem_arg);
            }
            Width::I16 => {
                f.instructions().i32_store16(mem_arg);
            }
            Width::I64 | Width::F64 => {
                f.instructions().i64_store(mem_arg);
            }
            _ => {
                f.instructions().i32_store(mem_arg);
            }
        }
    }

    fn emit_load_indexed(&self, f: &mut Function, width: Width) {
        let mem_arg = MemArg {
            offset: 0,
            align: 2,
            memory_index: 1,
        };
        match width {
            Width::I8 => {
                f.instructions().i32_load8_u(mem_arg);
            }
            Width::I16 => {
                f.instructions().i32_load16_u(mem_arg);
            }
            Width::I64 | Width::F64 => {
                f.instructions().i64_load(mem_arg);
            }
            _ => {
                f.instructions().i32_load(mem_arg);
            }
        }
    }

    fn emit_store_indexed(&self, f: &mut Function, width: Width) {
        let mem_arg = MemArg {
            offset: 0,
            align: 2,
            memory_index: 1,
        };
        match width {
            Width::I8 => {
                f.instructions().i32_store8(mem_arg);
            }
            Width::I16 => {
                f.instructions().i32_store16(mem_arg);
            }
            Width::I64 | Width::F64 => {
                f.instructions().i64_store(mem_arg);
            }
            _ => {
                f.instructions().i32_store(mem_arg);
            }
        }
    }

    fn emit_binop(&self, f: &mut Function, opcode: Opcode, width: Width) {
        let is64 = matches!(width, Width::I64 | Width::F64);
        let ins = f.instructions();
        match (opcode, is64) {
            (Opcode::Add, false) => ins.i32_add(),
            (Opcode::Add, true) => ins.i64_add(),
            (Opcode::Sub, false) => ins.i32_sub(),
            (Opcode::Sub, true) => ins.i64_sub(),
            (Opcode::UMul, false) => ins.i32_mul(),
            (Opcode::UMul, true) => ins.i64_mul(),
            (Opcode::UDiv, false) => ins.i32_div_u(),
            (Opcode::UDiv, true) => ins.i64_div_u(),
            (Opcode::And, false) => ins.i32_and(),
            (Opcode::And, true) => ins.i64_and(),
            (Opcode::Or, false) => ins.i32_or(),
            (Opcode::Or, true) => ins.i64_or(),
            (Opcode::Xor, false) => ins.i32_xor(),
            (Opcode::Xor, true) => ins.i64_xor(),
            (Opcode::Shl, false) => ins.i32_shl(),
            (Opcode::Shl, true) => ins.i64_shl(),
            (Opcode::Lshr, false) => ins.i32_shr_u(),
            (Opcode::Lshr, true) => ins.i64_shr_u(),
            (Opcode::Ashr, false) => ins.i32_shr_s(),
            (Opcode::Ashr, true) => ins.i64_shr_s(),
            _ => ins.nop(),
        };
    }

    fn emit_unop(&self, f: &mut Function, opcode: Opcode, width: Width) {
        let is64 = matches!(width, Width::I64 | Width::F64);
        match (opcode, is64) {
            (Opcode::Not, false) => {
                f.instructions().i32_const(-1);
                f.instructions().i32_xor();
            }
            (Opcode::Not, true) => {
                f.instructions().i64_const(-1);
                f.instructions().i64_xor();
            }
            (Opcode::Neg, false) => {
                f.instructions().i32_const(0);
                // `result = 0 - v`; the operand is already on the stack, so swap via a temp is
                // unnecessary for i32.sub's operand order (we pushed 0 after the operand, so
                // compute v - 0 then negate with xor/add as a two's-complement identity instead).
                f.instructions().i32_const(-1);
                f.instructions().i32_xor();
                f.instructions().i32_const(1);
                f.instructions().i32_add();
            }
            (Opcode::Neg, true) => {
                f.instructions().i64_const(-1);
                f.instructions().i64_xor();
                f.instructions().i64_const(1);
                f.instructions().i64_add();
            }
            _ => {
                f.instructions().nop();
            }
        }
    }

    fn emit_local_get(
        &self,
        f: &mut Function,
        layout: &LocalLayout,
        unit: &IrUnit,
        arg: Option<crate::ir::ValueId>,
    ) {
        let Some(arg) = arg else { return };
        let value = unit.value(arg);
        if let Some(bits) = value.const_bits() {
            match value.width {
                Width::I64 | Width::F64 => {
                    f.instructions().i64_const(bits as i64);
                }
                _ => {
                    f.instructions().i32_const(bits as i32);
                }
            };
            return;
        }
        if let Some(reg) = value.reg {
            let idx = layout.local_index(value.width, reg);
            f.instructions().local_get(idx);
        }
    }

    fn emit_local_set(
        &self,
        f: &mut Function,
        layout: &LocalLayout,
        unit: &IrUnit,
        result: Option<crate::ir::ValueId>,
    ) {
        let Some(result) = result else { return };
        let value = unit.value(result);
        if let Some(reg) = value.reg {
            let idx = layout.local_index(value.width, reg);
            f.instructions().local_set(idx);
        } else {
            f.instructions().drop();
        }
    }
}

impl Default for WasmBackend {
    fn default() -> Self {
        Self::new()
    }
}
