//! Dead-code elimination (`spec.md` §4.4.4): a single reverse sweep per block removes any
//! instruction whose result has no remaining uses. Run after `lse`/`cprop`/`esimp`, the reverse
//! order naturally collapses chains of instructions that only fed each other.

use crate::ir::{InstrId, IrUnit};

pub fn run(unit: &mut IrUnit) -> usize {
    let mut removed = 0;
    for block in unit.block_ids().collect::<Vec<_>>() {
        let instr_ids: Vec<InstrId> = unit.block(block).instrs.clone();
        for &instr_id in instr_ids.iter().rev() {
            let instr = unit.instr(instr_id);
            let Some(result) = instr.result else { continue };
            if instr.opcode.is_lse_barrier() {
                continue;
            }
            if unit.value(result).uses.is_empty() {
                unit.remove_instr(instr_id);
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, Opcode};
    use nova_types::Width;

    #[test]
    fn a_chain_of_values_with_no_remaining_consumer_is_fully_removed() {
        let mut b = IrBuilder::new();
        let c0 = b.const_int(Width::I32, 1);
        let c1 = b.const_int(Width::I32, 2);
        let sum = b.add(Width::I32, c0, c1);
        let _unused = b.neg(Width::I32, sum); // dead: nothing reads it

        let removed = run(&mut b.unit);
        assert_eq!(removed, 2, "both the neg and the add it alone fed become dead");

        let remaining = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .filter(|&&id| matches!(b.unit.instr(id).opcode, Opcode::Add | Opcode::Neg))
            .count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn a_fallback_with_no_result_is_never_removed_as_dead() {
        let mut b = IrBuilder::new();
        b.fallback(3, 0x1234, false);
        let removed = run(&mut b.unit);
        assert_eq!(removed, 0);
        assert_eq!(b.unit.block(b.entry).instrs.len(), 1);
    }
}
