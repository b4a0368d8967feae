//! Expression simplification (`spec.md` §4.4.3): algebraic identities with the constant on the
//! right (the frontend is assumed to have pre-canonicalised commutative ops so a literal operand
//! always lands in `args[1]`).

use crate::ir::{InstrId, IrUnit, Opcode, ValueId};

enum Simplification {
    /// Replace the result with this existing value.
    SameAs(ValueId),
    /// Replace the result with a freshly materialised zero constant of its own width.
    Zero,
}

fn simplify(unit: &IrUnit, opcode: Opcode, lhs: ValueId, rhs: Option<ValueId>) -> Option<Simplification> {
    if let Some(rhs) = rhs {
        if lhs == rhs {
            return match opcode {
                Opcode::Xor => Some(Simplification::Zero),
                Opcode::And | Opcode::Or => Some(Simplification::SameAs(lhs)),
                _ => None,
            };
        }

        if let Some(rhs_bits) = unit.value(rhs).const_bits() {
            return match (opcode, rhs_bits) {
                (Opcode::And, 0) | (Opcode::UMul, 0) => Some(Simplification::Zero),
                (Opcode::Add, 0)
                | (Opcode::Sub, 0)
                | (Opcode::Or, 0)
                | (Opcode::Xor, 0)
                | (Opcode::Shl, 0)
                | (Opcode::Lshr, 0)
                | (Opcode::Ashr, 0)
                | (Opcode::UMul, 1)
                | (Opcode::UDiv, 1) => Some(Simplification::SameAs(lhs)),
                _ => None,
            };
        }
    }
    None
}

/// Runs one sweep of algebraic simplification over every block. Returns the number of
/// instructions simplified and removed.
pub fn run(unit: &mut IrUnit) -> usize {
    let mut simplified = 0;
    for block in unit.block_ids().collect::<Vec<_>>() {
        let instr_ids: Vec<InstrId> = unit.block(block).instrs.clone();
        for instr_id in instr_ids {
            let instr = unit.instr(instr_id).clone();
            let Some(result) = instr.result else { continue };
            let arity = instr.opcode.arity();
            if arity == 0 {
                continue;
            }
            let Some(lhs) = instr.args[0] else { continue };
            let rhs = if arity == 2 { instr.args[1] } else { None };

            let Some(simplification) = simplify(unit, instr.opcode, lhs, rhs) else {
                continue;
            };

            let replacement = match simplification {
                Simplification::SameAs(v) => v,
                Simplification::Zero => {
                    let width = unit.value(result).width;
                    unit.alloc_const(width, 0)
                }
            };

            unit.replace_value(result, replacement);
            unit.remove_instr(instr_id);
            simplified += 1;
        }
    }
    simplified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;
    use nova_types::Width;

    #[test]
    fn xor_of_a_value_with_itself_becomes_zero() {
        let mut b = IrBuilder::new();
        let v = b.load_context(0x10, Width::I32);
        let result = b.xor(Width::I32, v, v);
        b.store_context(0x20, Width::I32, result);

        let simplified = run(&mut b.unit);
        assert_eq!(simplified, 1);

        let store = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .find(|&&id| matches!(b.unit.instr(id).opcode, Opcode::StoreContext { .. }))
            .copied()
            .unwrap();
        let stored = b.unit.instr(store).args[0].unwrap();
        assert_eq!(b.unit.value(stored).const_bits(), Some(0));
    }

    #[test]
    fn add_zero_is_removed() {
        let mut b = IrBuilder::new();
        let v = b.load_context(0x10, Width::I32);
        let zero = b.const_int(Width::I32, 0);
        let result = b.add(Width::I32, v, zero);
        b.store_context(0x20, Width::I32, result);

        let simplified = run(&mut b.unit);
        assert_eq!(simplified, 1);

        let store = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .find(|&&id| matches!(b.unit.instr(id).opcode, Opcode::StoreContext { .. }))
            .copied()
            .unwrap();
        assert_eq!(b.unit.instr(store).args[0], Some(v));
    }

    #[test]
    fn and_with_zero_becomes_zero() {
        let mut b = IrBuilder::new();
        let v = b.load_context(0x10, Width::I32);
        let zero = b.const_int(Width::I32, 0);
        let result = b.and(Width::I32, v, zero);
        b.store_context(0x20, Width::I32, result);

        let simplified = run(&mut b.unit);
        assert_eq!(simplified, 1);

        let store = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .find(|&&id| matches!(b.unit.instr(id).opcode, Opcode::StoreContext { .. }))
            .copied()
            .unwrap();
        let stored = b.unit.instr(store).args[0].unwrap();
        assert_eq!(b.unit.value(stored).const_bits(), Some(0));
    }

    #[test]
    fn ashr_by_zero_is_a_no_op_identity() {
        // spec.md §9's redesign flag: treat ASHR-by-zero as the authoritative identity form.
        let mut b = IrBuilder::new();
        let v = b.load_context(0x10, Width::I32);
        let zero = b.const_int(Width::I32, 0);
        let result = b.ashr(Width::I32, v, zero);
        b.store_context(0x20, Width::I32, result);

        let simplified = run(&mut b.unit);
        assert_eq!(simplified, 1);
    }
}
