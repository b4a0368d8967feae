//! A small textual assembly form for [`IrUnit`], used only by the round-trip property test in
//! `spec.md` §8 ("write(ir); read() produces an IR structurally equal (up to ordinal numbering)
//! to the original") and for human-readable debug dumps.
//!
//! Values are named lazily in the order they are first printed — the same "slot" numbering the
//! original engine's `IRWriter` uses (`src/jit/ir/ir_writer.cc` in the retrieved source) — so two
//! different arena layouts that are merely renumberings of each other print identically.

use std::collections::HashMap;
use std::fmt::Write as _;

use nova_types::Width;

use super::ids::{BlockId, LocalId, ValueId};
use super::instr::Opcode;
use super::unit::IrUnit;
use super::value::ValueData;

#[derive(Debug, thiserror::Error)]
pub enum TextFormatError {
    #[error("unexpected end of input")]
    Eof,
    #[error("malformed line: {0:?}")]
    Malformed(String),
    #[error("unknown opcode mnemonic: {0}")]
    UnknownOpcode(String),
    #[error("unknown width: {0}")]
    UnknownWidth(String),
    #[error("reference to undeclared value %{0}")]
    UndeclaredValue(u32),
    #[error("reference to undeclared block b{0}")]
    UndeclaredBlock(u32),
}

fn width_name(w: Width) -> &'static str {
    match w {
        Width::Void => "void",
        Width::I8 => "i8",
        Width::I16 => "i16",
        Width::I32 => "i32",
        Width::I64 => "i64",
        Width::F32 => "f32",
        Width::F64 => "f64",
        Width::V128 => "v128",
        Width::BlockRef => "blockref",
    }
}

fn parse_width(s: &str) -> Result<Width, TextFormatError> {
    Ok(match s {
        "void" => Width::Void,
        "i8" => Width::I8,
        "i16" => Width::I16,
        "i32" => Width::I32,
        "i64" => Width::I64,
        "f32" => Width::F32,
        "f64" => Width::F64,
        "v128" => Width::V128,
        "blockref" => Width::BlockRef,
        other => return Err(TextFormatError::UnknownWidth(other.to_string())),
    })
}

struct Namer {
    ids: HashMap<u32, u32>,
    next: u32,
}

impl Namer {
    fn new() -> Self {
        Namer {
            ids: HashMap::new(),
            next: 0,
        }
    }

    fn name(&mut self, value: ValueId) -> u32 {
        *self.ids.entry(value.0).or_insert_with(|| {
            let n = self.next;
            self.next += 1;
            n
        })
    }
}

/// Serialises `unit` to text. Blocks are printed in arena order; within a block, values are named
/// the first time they appear (as a constant declaration or as an instruction's result).
pub fn write_ir(unit: &IrUnit) -> String {
    let mut out = String::new();
    let mut namer = Namer::new();

    for (i, local) in unit.locals.iter().enumerate() {
        let _ = writeln!(out, "local l{}: {} @{:#x}", i, width_name(local.width), local.offset);
    }

    for block_id in unit.block_ids() {
        let _ = writeln!(out, "block b{}:", block_id.0);
        for &instr_id in &unit.block(block_id).instrs {
            let instr = unit.instr(instr_id);
            let mut arg_names = Vec::new();
            for slot in instr.args.iter().take(instr.opcode.arity()) {
                let value = slot.expect("declared arity must be satisfied");
                arg_names.push(print_value_ref(unit, &mut namer, value));
            }

            let lhs = instr.result.map(|r| format!("%{} = ", namer.name(r)));
            let _ = write!(out, "  {}", lhs.unwrap_or_default());
            print_opcode_line(&mut out, instr.opcode, &arg_names);
        }
    }

    out
}

fn print_value_ref(unit: &IrUnit, namer: &mut Namer, value: ValueId) -> String {
    match unit.value(value).data {
        ValueData::Const { bits } => match unit.value(value).width {
            Width::BlockRef => format!("b{}", bits),
            w => format!("{}:{:#x}", width_name(w), bits),
        },
        ValueData::Def { .. } => format!("%{}", namer.name(value)),
    }
}

fn print_opcode_line(out: &mut String, opcode: Opcode, args: &[String]) {
    let a = |i: usize| args.get(i).cloned().unwrap_or_default();
    let line = match opcode {
        Opcode::LoadContext { offset, width } => {
            format!("load_context[{:#x}:{}]", offset, width_name(width))
        }
        Opcode::StoreContext { offset, width } => {
            format!("store_context[{:#x}:{}] {}", offset, width_name(width), a(0))
        }
        Opcode::LoadLocal { local, width } => {
            format!("load_local[l{}:{}]", local.0, width_name(width))
        }
        Opcode::StoreLocal { local, width } => {
            format!("store_local[l{}:{}] {}", local.0, width_name(width), a(0))
        }
        Opcode::LoadMem { width } => format!("load_mem[{}] {}", width_name(width), a(0)),
        Opcode::StoreMem { width } => {
            format!("store_mem[{}] {}, {}", width_name(width), a(0), a(1))
        }
        Opcode::Add => format!("add {}, {}", a(0), a(1)),
        Opcode::Sub => format!("sub {}, {}", a(0), a(1)),
        Opcode::UMul => format!("umul {}, {}", a(0), a(1)),
        Opcode::UDiv => format!("udiv {}, {}", a(0), a(1)),
        Opcode::And => format!("and {}, {}", a(0), a(1)),
        Opcode::Or => format!("or {}, {}", a(0), a(1)),
        Opcode::Xor => format!("xor {}, {}", a(0), a(1)),
        Opcode::Not => format!("not {}", a(0)),
        Opcode::Neg => format!("neg {}", a(0)),
        Opcode::Shl => format!("shl {}, {}", a(0), a(1)),
        Opcode::Lshr => format!("lshr {}, {}", a(0), a(1)),
        Opcode::Ashr => format!("ashr {}, {}", a(0), a(1)),
        Opcode::AssertEq => format!("assert_eq {}, {}", a(0), a(1)),
        Opcode::SourceInfo { guest_pc, cycles } => {
            format!("source_info {:#x}, {}", guest_pc, cycles)
        }
        Opcode::Branch => format!("branch {}", a(0)),
        Opcode::BranchTrue => format!("branch_true {}, {}", a(0), a(1)),
        Opcode::BranchFalse => format!("branch_false {}, {}", a(0), a(1)),
        Opcode::Fallback {
            callback,
            raw_instr,
            sets_pc,
        } => format!("fallback {}, {:#x}, {}", callback, raw_instr, sets_pc),
    };
    out.push_str(&line);
    out.push('\n');
}

/// Parses `text` (as produced by [`write_ir`]) into a fresh [`IrUnit`]. Per `spec.md` §8 the
/// result need only be isomorphic to the original, not identically numbered.
pub fn read_ir(text: &str) -> Result<IrUnit, TextFormatError> {
    let mut unit = IrUnit::new();

    let mut locals: HashMap<u32, LocalId> = HashMap::new();
    let mut blocks: HashMap<u32, BlockId> = HashMap::new();
    let mut values: HashMap<u32, ValueId> = HashMap::new();
    let mut current_block: Option<BlockId> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("local l") {
            let (idx_str, rest) = rest.split_once(':').ok_or(TextFormatError::Malformed(line.into()))?;
            let idx: u32 = idx_str.trim().parse().map_err(|_| TextFormatError::Malformed(line.into()))?;
            let rest = rest.trim();
            let (width_str, offset_str) =
                rest.split_once('@').ok_or(TextFormatError::Malformed(line.into()))?;
            let width = parse_width(width_str.trim())?;
            let offset = parse_hex(offset_str.trim())?;
            let id = unit.alloc_local(width, offset as u32);
            locals.insert(idx, id);
            continue;
        }

        if let Some(rest) = line.strip_prefix("block b") {
            let idx_str = rest.trim_end_matches(':');
            let idx: u32 = idx_str.trim().parse().map_err(|_| TextFormatError::Malformed(line.into()))?;
            let id = *blocks.entry(idx).or_insert_with(|| unit.alloc_block());
            unit.set_insert_point(id);
            current_block = Some(id);
            continue;
        }

        let block = current_block.ok_or_else(|| TextFormatError::Malformed(line.into()))?;
        unit.set_insert_point(block);
        parse_instr_line(&mut unit, line, &mut locals, &mut blocks, &mut values)?;
    }

    Ok(unit)
}

fn parse_hex(s: &str) -> Result<u64, TextFormatError> {
    let s = s.trim_start_matches("0x");
    u64::from_str_radix(s, 16).map_err(|_| TextFormatError::Malformed(s.to_string()))
}

fn resolve_value(
    unit: &mut IrUnit,
    values: &mut HashMap<u32, ValueId>,
    blocks: &mut HashMap<u32, BlockId>,
    token: &str,
) -> Result<ValueId, TextFormatError> {
    let token = token.trim().trim_end_matches(',');
    if let Some(rest) = token.strip_prefix('%') {
        let idx: u32 = rest.parse().map_err(|_| TextFormatError::Malformed(token.into()))?;
        return values
            .get(&idx)
            .copied()
            .ok_or(TextFormatError::UndeclaredValue(idx));
    }
    if let Some(rest) = token.strip_prefix('b') {
        let idx: u32 = rest.parse().map_err(|_| TextFormatError::Malformed(token.into()))?;
        let block = *blocks.entry(idx).or_insert_with(|| unit.alloc_block());
        return Ok(unit.alloc_const(Width::BlockRef, block.0 as u64));
    }
    let (width_str, bits_str) = token
        .split_once(':')
        .ok_or(TextFormatError::Malformed(token.into()))?;
    let width = parse_width(width_str)?;
    let bits = parse_hex(bits_str)?;
    Ok(unit.alloc_const(width, bits))
}

#[allow(clippy::too_many_lines)]
fn parse_instr_line(
    unit: &mut IrUnit,
    line: &str,
    locals: &mut HashMap<u32, LocalId>,
    blocks: &mut HashMap<u32, BlockId>,
    values: &mut HashMap<u32, ValueId>,
) -> Result<(), TextFormatError> {
    let (lhs, rhs) = match line.split_once('=') {
        Some((l, r)) => (Some(l.trim()), r.trim()),
        None => (None, line),
    };

    let (mnemonic, rest) = rhs.split_once(' ').unwrap_or((rhs, ""));
    let args: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(str::trim).collect()
    };

    let bind_result = |unit: &mut IrUnit, values: &mut HashMap<u32, ValueId>, result: Option<ValueId>| {
        if let (Some(lhs), Some(result)) = (lhs, result) {
            let idx: u32 = lhs
                .trim_start_matches('%')
                .parse()
                .unwrap_or(u32::MAX);
            values.insert(idx, result);
        }
        let _ = unit;
    };

    macro_rules! arg {
        ($i:expr) => {
            resolve_value(unit, values, blocks, args[$i])?
        };
    }

    if let Some(rest) = mnemonic.strip_prefix("load_context[") {
        let (offset, width) = parse_bracket(rest)?;
        let (_, result) = unit.append(Opcode::LoadContext { offset, width }, width);
        bind_result(unit, values, result);
        return Ok(());
    }
    if let Some(rest) = mnemonic.strip_prefix("store_context[") {
        let (offset, width) = parse_bracket(rest)?;
        let v = arg!(0);
        let (instr, _) = unit.append(Opcode::StoreContext { offset, width }, Width::Void);
        unit.set_arg(instr, 0, v);
        return Ok(());
    }
    if let Some(rest) = mnemonic.strip_prefix("load_local[") {
        let (local_idx, width) = parse_local_bracket(rest)?;
        let local = *locals
            .entry(local_idx)
            .or_insert_with(|| unit.alloc_local(width, 0));
        let (_, result) = unit.append(Opcode::LoadLocal { local, width }, width);
        bind_result(unit, values, result);
        return Ok(());
    }
    if let Some(rest) = mnemonic.strip_prefix("store_local[") {
        let (local_idx, width) = parse_local_bracket(rest)?;
        let local = *locals
            .entry(local_idx)
            .or_insert_with(|| unit.alloc_local(width, 0));
        let v = arg!(0);
        let (instr, _) = unit.append(Opcode::StoreLocal { local, width }, Width::Void);
        unit.set_arg(instr, 0, v);
        return Ok(());
    }
    if let Some(rest) = mnemonic.strip_prefix("load_mem[") {
        let width = parse_width(rest.trim_end_matches(']'))?;
        let addr = arg!(0);
        let (instr, result) = unit.append(Opcode::LoadMem { width }, width);
        unit.set_arg(instr, 0, addr);
        bind_result(unit, values, result);
        return Ok(());
    }
    if let Some(rest) = mnemonic.strip_prefix("store_mem[") {
        let width = parse_width(rest.trim_end_matches(']'))?;
        let addr = arg!(0);
        let value = arg!(1);
        let (instr, _) = unit.append(Opcode::StoreMem { width }, Width::Void);
        unit.set_arg(instr, 0, addr);
        unit.set_arg(instr, 1, value);
        return Ok(());
    }

    let width_of = |unit: &IrUnit, v: ValueId| unit.value(v).width;

    match mnemonic {
        "add" | "sub" | "umul" | "udiv" | "and" | "or" | "xor" | "shl" | "lshr" | "ashr" => {
            let lhs_v = arg!(0);
            let rhs_v = arg!(1);
            let width = width_of(unit, lhs_v);
            let opcode = match mnemonic {
                "add" => Opcode::Add,
                "sub" => Opcode::Sub,
                "umul" => Opcode::UMul,
                "udiv" => Opcode::UDiv,
                "and" => Opcode::And,
                "or" => Opcode::Or,
                "xor" => Opcode::Xor,
                "shl" => Opcode::Shl,
                "lshr" => Opcode::Lshr,
                _ => Opcode::Ashr,
            };
            let (instr, result) = unit.append(opcode, width);
            unit.set_arg(instr, 0, lhs_v);
            unit.set_arg(instr, 1, rhs_v);
            bind_result(unit, values, result);
        }
        "not" | "neg" => {
            let v = arg!(0);
            let width = width_of(unit, v);
            let opcode = if mnemonic == "not" { Opcode::Not } else { Opcode::Neg };
            let (instr, result) = unit.append(opcode, width);
            unit.set_arg(instr, 0, v);
            bind_result(unit, values, result);
        }
        "assert_eq" => {
            let a = arg!(0);
            let b = arg!(1);
            let (instr, _) = unit.append(Opcode::AssertEq, Width::Void);
            unit.set_arg(instr, 0, a);
            unit.set_arg(instr, 1, b);
        }
        "source_info" => {
            let guest_pc = parse_hex(args[0])?;
            let cycles: u32 = args[1].parse().map_err(|_| TextFormatError::Malformed(line.into()))?;
            unit.append(Opcode::SourceInfo { guest_pc, cycles }, Width::Void);
        }
        "branch" => {
            let target = arg!(0);
            let (instr, _) = unit.append(Opcode::Branch, Width::Void);
            unit.set_arg(instr, 0, target);
            link_edge(unit, target);
        }
        "branch_true" => {
            let cond = arg!(0);
            let target = arg!(1);
            let (instr, _) = unit.append(Opcode::BranchTrue, Width::Void);
            unit.set_arg(instr, 0, cond);
            unit.set_arg(instr, 1, target);
            link_edge(unit, target);
        }
        "branch_false" => {
            let cond = arg!(0);
            let target = arg!(1);
            let (instr, _) = unit.append(Opcode::BranchFalse, Width::Void);
            unit.set_arg(instr, 0, cond);
            unit.set_arg(instr, 1, target);
            link_edge(unit, target);
        }
        "fallback" => {
            let callback: u32 = args[0].parse().map_err(|_| TextFormatError::Malformed(line.into()))?;
            let raw_instr = parse_hex(args[1])? as u32;
            let sets_pc: bool = args[2].parse().map_err(|_| TextFormatError::Malformed(line.into()))?;
            unit.append(
                Opcode::Fallback {
                    callback,
                    raw_instr,
                    sets_pc,
                },
                Width::Void,
            );
        }
        other => return Err(TextFormatError::UnknownOpcode(other.to_string())),
    }

    Ok(())
}

fn link_edge(unit: &mut IrUnit, target_ref: ValueId) {
    if let Some(bits) = unit.value(target_ref).const_bits() {
        let src = unit.current_block();
        let dst = BlockId(bits as u32);
        unit.add_edge(src, dst);
    }
}

fn parse_bracket(rest: &str) -> Result<(u32, Width), TextFormatError> {
    let rest = rest.trim_end_matches(']');
    let (offset_str, width_str) = rest
        .split_once(':')
        .ok_or(TextFormatError::Malformed(rest.to_string()))?;
    let offset = parse_hex(offset_str)? as u32;
    let width = parse_width(width_str)?;
    Ok((offset, width))
}

fn parse_local_bracket(rest: &str) -> Result<(u32, Width), TextFormatError> {
    let rest = rest.trim_end_matches(']');
    let (local_str, width_str) = rest
        .split_once(':')
        .ok_or(TextFormatError::Malformed(rest.to_string()))?;
    let idx: u32 = local_str
        .trim_start_matches('l')
        .parse()
        .map_err(|_| TextFormatError::Malformed(rest.to_string()))?;
    let width = parse_width(width_str)?;
    Ok((idx, width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;

    #[test]
    fn round_trips_a_simple_block() {
        let mut b = IrBuilder::new();
        let c0 = b.const_int(Width::I32, 3);
        let c1 = b.const_int(Width::I32, 4);
        let sum = b.add(Width::I32, c0, c1);
        b.store_context(0x10, Width::I32, sum);
        b.branch(b.entry);

        let text = write_ir(&b.unit);
        let parsed = read_ir(&text).expect("round-trip parse");

        assert_eq!(parsed.blocks.len(), b.unit.blocks.len());
        let total_instrs: usize = b.unit.blocks.iter().map(|blk| blk.instrs.len()).sum();
        let total_parsed: usize = parsed.blocks.iter().map(|blk| blk.instrs.len()).sum();
        assert_eq!(total_instrs, total_parsed);

        let text2 = write_ir(&parsed);
        assert_eq!(text, text2, "re-serialising the parsed IR must be stable");
    }
}
