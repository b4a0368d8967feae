//! Constant propagation (`spec.md` §4.4.2): folds any instruction whose arguments are all
//! constants into a single constant of the result type, replaces the result everywhere, and
//! removes the folded instruction.
//!
//! Floating-point folding is deliberately not performed, matching the source engine's choice to
//! avoid host/guest rounding divergence (`spec.md` §4.4.2).

use crate::ir::{InstrId, IrUnit, Opcode};

fn fold(opcode: Opcode, width: nova_types::Width, lhs: u64, rhs: Option<u64>) -> Option<u64> {
    let mask = match width.bytes()? {
        1 => u8::MAX as u64,
        2 => u16::MAX as u64,
        4 => u32::MAX as u64,
        8 => u64::MAX,
        _ => return None,
    };
    let rhs = rhs.unwrap_or(0);
    let result = match opcode {
        Opcode::Add => lhs.wrapping_add(rhs),
        Opcode::Sub => lhs.wrapping_sub(rhs),
        Opcode::UMul => lhs.wrapping_mul(rhs),
        Opcode::UDiv => {
            if rhs == 0 {
                return None;
            }
            lhs / rhs
        }
        Opcode::And => lhs & rhs,
        Opcode::Or => lhs | rhs,
        Opcode::Xor => lhs ^ rhs,
        Opcode::Not => !lhs,
        Opcode::Neg => (!lhs).wrapping_add(1),
        Opcode::Shl => lhs.wrapping_shl(rhs as u32),
        Opcode::Lshr => lhs.wrapping_shr(rhs as u32),
        _ => return None,
    };
    Some(result & mask)
}

/// Runs one sweep of constant folding over every block. Returns the number of instructions
/// folded and removed.
pub fn run(unit: &mut IrUnit) -> usize {
    let mut folded = 0;
    for block in unit.block_ids().collect::<Vec<_>>() {
        let instr_ids: Vec<InstrId> = unit.block(block).instrs.clone();
        for instr_id in instr_ids {
            let instr = unit.instr(instr_id).clone();
            let Some(result) = instr.result else { continue };
            let arity = instr.opcode.arity();
            if arity == 0 || arity > 2 {
                continue;
            }
            let Some(lhs_val) = instr.args[0] else { continue };
            let Some(lhs_bits) = unit.value(lhs_val).const_bits() else {
                continue;
            };
            let rhs_bits = if arity == 2 {
                let Some(rhs_val) = instr.args[1] else { continue };
                match unit.value(rhs_val).const_bits() {
                    Some(b) => Some(b),
                    None => continue,
                }
            } else {
                None
            };

            let width = unit.value(result).width;
            if let Some(folded_bits) = fold(instr.opcode, width, lhs_bits, rhs_bits) {
                let new_value = unit.alloc_const(width, folded_bits);
                unit.replace_value(result, new_value);
                unit.remove_instr(instr_id);
                folded += 1;
            }
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;
    use nova_types::Width;

    #[test]
    fn constant_fold_chain_collapses_to_one_constant() {
        let mut b = IrBuilder::new();
        let c1 = b.const_int(Width::I32, 2);
        let c2 = b.const_int(Width::I32, 3);
        let sum = b.add(Width::I32, c1, c2); // 5
        let c4 = b.const_int(Width::I32, 10);
        let product = b.umul(Width::I32, sum, c4); // 50
        b.store_context(0x10, Width::I32, product);

        let folded = run(&mut b.unit);
        assert_eq!(folded, 2);

        let remaining_binops = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .filter(|&&id| matches!(b.unit.instr(id).opcode, Opcode::Add | Opcode::UMul))
            .count();
        assert_eq!(remaining_binops, 0);
    }

    #[test]
    fn division_by_a_folded_zero_is_left_unfolded() {
        let mut b = IrBuilder::new();
        let lhs = b.const_int(Width::I32, 10);
        let rhs = b.const_int(Width::I32, 0);
        let _ = b.udiv(Width::I32, lhs, rhs);

        let folded = run(&mut b.unit);
        assert_eq!(folded, 0);
    }
}
