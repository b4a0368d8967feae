//! Linear-scan register allocation (`spec.md` §4.4.5), the final pass in the fixed pipeline.
//!
//! Runs over a linearised ordering of instructions (block order, then instruction order within a
//! block), with registers partitioned by [`RegClass`] into three independent pools. After this
//! pass every non-constant value has `reg` set, and the IR may additionally contain `load_local`/
//! `store_local` pairs inserted by spilling.

use std::collections::HashMap;

use nova_types::{RegClass, Width};

use crate::ir::{BlockId, InstrId, IrUnit, Opcode, ValueId};

/// A guest's allocatable physical register set, partitioned by [`RegClass`]. Indices are opaque
/// to this pass — they're whatever the backend's register descriptor table (`spec.md` §4.5)
/// assigns meaning to.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    int: Vec<u32>,
    float: Vec<u32>,
    vector: Vec<u32>,
}

impl RegisterFile {
    pub fn new(int: Vec<u32>, float: Vec<u32>, vector: Vec<u32>) -> Self {
        RegisterFile { int, float, vector }
    }

    fn pool(&self, class: RegClass) -> &[u32] {
        match class {
            RegClass::Int => &self.int,
            RegClass::Float => &self.float,
            RegClass::Vector => &self.vector,
        }
    }
}

struct Interval {
    value: ValueId,
    reg: u32,
    /// Remaining use ordinals, ascending; the front is this interval's next use.
    remaining_uses: Vec<u32>,
}

impl Interval {
    fn next_use(&self) -> Option<u32> {
        self.remaining_uses.first().copied()
    }
}

struct Pool {
    free: Vec<u32>,
    active: Vec<Interval>,
}

impl Pool {
    fn new(regs: &[u32]) -> Self {
        Pool {
            free: regs.to_vec(),
            active: Vec::new(),
        }
    }

    /// Drops every interval whose next use has already passed, returning its register to the
    /// free list, or advances it past an already-realised use.
    fn expire(&mut self, ordinal: u32) {
        let mut i = 0;
        while i < self.active.len() {
            while self.active[i].next_use().is_some_and(|u| u <= ordinal) {
                self.active[i].remaining_uses.remove(0);
            }
            if self.active[i].next_use().is_none() {
                let expired = self.active.swap_remove(i);
                self.free.push(expired.reg);
            } else {
                i += 1;
            }
        }
    }

    fn take_free(&mut self) -> Option<u32> {
        self.free.pop()
    }

    /// Evicts the active interval with the furthest next use, spilling it. Returns the evicted
    /// interval's value and freed register.
    fn evict_furthest(&mut self) -> Option<(ValueId, u32)> {
        let (idx, _) = self
            .active
            .iter()
            .enumerate()
            .max_by_key(|(_, iv)| iv.next_use().unwrap_or(u32::MAX))?;
        let evicted = self.active.swap_remove(idx);
        Some((evicted.value, evicted.reg))
    }

    fn retire_value(&mut self, value: ValueId) -> Option<u32> {
        let idx = self.active.iter().position(|iv| iv.value == value)?;
        let iv = self.active.swap_remove(idx);
        Some(iv.reg)
    }
}

fn binop_allows_reuse(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Lshr
            | Opcode::Ashr
            | Opcode::UMul
    )
}

/// Linearises the unit's instructions (block order, then in-block order) and assigns ordinals
/// with stride 10, per `spec.md` §4.4.5.
fn assign_ordinals(unit: &mut IrUnit) -> Vec<InstrId> {
    let mut order = Vec::new();
    for block in unit.block_ids().collect::<Vec<BlockId>>() {
        for &instr_id in &unit.block(block).instrs {
            order.push(instr_id);
        }
    }
    for (i, &instr_id) in order.iter().enumerate() {
        unit.set_ordinal(instr_id, (i as u32) * 10);
    }
    order
}

/// For every value with a result, the ordinals (ascending) of the instructions that use it.
fn use_ordinals(unit: &IrUnit, order: &[InstrId]) -> HashMap<ValueId, Vec<u32>> {
    let ordinal_of: HashMap<InstrId, u32> = order
        .iter()
        .map(|&id| (id, unit.instr(id).ordinal.unwrap_or(0)))
        .collect();

    let mut uses: HashMap<ValueId, Vec<u32>> = HashMap::new();
    for &instr_id in order {
        let instr = unit.instr(instr_id);
        for arg in instr.args.iter().flatten() {
            if unit.value(*arg).is_const() {
                continue;
            }
            uses.entry(*arg)
                .or_default()
                .push(ordinal_of[&instr_id]);
        }
    }
    for list in uses.values_mut() {
        list.sort_unstable();
    }
    uses
}

/// Runs linear-scan allocation. Returns the number of spills inserted.
pub fn run(unit: &mut IrUnit, regs: &RegisterFile) -> usize {
    let order = assign_ordinals(unit);
    let mut use_map = use_ordinals(unit, &order);

    let mut int_pool = Pool::new(regs.pool(RegClass::Int));
    let mut float_pool = Pool::new(regs.pool(RegClass::Float));
    let mut vector_pool = Pool::new(regs.pool(RegClass::Vector));
    let mut spills = 0usize;

    for &instr_id in &order {
        let ordinal = unit.instr(instr_id).ordinal.unwrap_or(0);
        int_pool.expire(ordinal);
        float_pool.expire(ordinal);
        vector_pool.expire(ordinal);

        let instr = unit.instr(instr_id).clone();
        let Some(result) = instr.result else { continue };
        let width = unit.value(result).width;
        let Some(class) = RegClass::of(width) else { continue };

        let pool = match class {
            RegClass::Int => &mut int_pool,
            RegClass::Float => &mut float_pool,
            RegClass::Vector => &mut vector_pool,
        };

        let mut assigned_reg = None;

        // Reuse-arg0 heuristic: arg0's register can be handed straight to the result if this is
        // arg0's last use and the instruction is one of the two-operand-friendly ops.
        if binop_allows_reuse(instr.opcode) {
            if let Some(arg0) = instr.args[0] {
                let arg0_width = unit.value(arg0).width;
                if !unit.value(arg0).is_const()
                    && RegClass::of(arg0_width) == Some(class)
                    && use_map.get(&arg0).map(|u| u.len()).unwrap_or(0) <= 1
                {
                    if let Some(reg) = pool.retire_value(arg0) {
                        assigned_reg = Some(reg);
                    }
                }
            }
        }

        if assigned_reg.is_none() {
            assigned_reg = pool.take_free();
        }

        if assigned_reg.is_none() {
            if let Some((spilled_value, freed_reg)) = pool.evict_furthest() {
                spill_value(unit, spilled_value, instr_id, &mut use_map, pool);
                spills += 1;
                assigned_reg = Some(freed_reg);
            }
        }

        let Some(reg) = assigned_reg else { continue };
        unit.set_reg(result, Some(reg));
        let remaining = use_map.remove(&result).unwrap_or_default();
        pool.active.push(Interval {
            value: result,
            reg,
            remaining_uses: remaining,
        });
    }

    spills
}

/// Spills `value`: allocates a local, stores it immediately before `before`, and rewrites every
/// remaining use (recorded in `use_map`) to read through a `load_local` inserted immediately
/// before the using instruction instead. Each reload's result is itself given a register from
/// `pool` (its live range ends the instant the using instruction reads it, so the register is
/// handed straight back to the free list rather than tracked as an active interval) — without
/// this, the reload would have no register to materialise into and the backend would have to
/// discard it.
///
/// Only uses at or after `before`'s ordinal are rewritten: a use earlier in the block already
/// consumed `value` through its original register before the store goes in, and rewriting it too
/// would make it read the spill slot before `store_local` has written anything there.
fn spill_value(
    unit: &mut IrUnit,
    value: ValueId,
    before: InstrId,
    use_map: &mut HashMap<ValueId, Vec<u32>>,
    pool: &mut Pool,
) {
    let width = unit.value(value).width;
    // Demoted: its register now belongs to whoever evicted it, so it no longer has one of its own.
    unit.set_reg(value, None);
    // Each spill slot gets a disjoint 8-byte-aligned offset into the backend's spill region, wide
    // enough for the largest scalar width so `V128`-free fixed-width stores never overlap.
    let offset = unit.locals_len() as u32 * 8;
    let local = unit.alloc_local(width, offset);
    let block = unit.instr(before).block;

    let store_pos = unit
        .block(block)
        .instrs
        .iter()
        .position(|&id| id == before)
        .unwrap_or(unit.block(block).instrs.len());
    let saved = unit.set_insert_pos(store_pos);
    let (store_instr, _) = unit.append(
        Opcode::StoreLocal {
            local,
            width,
        },
        Width::Void,
    );
    unit.set_arg(store_instr, 0, value);
    unit.restore_insert_pos(saved);

    use_map.remove(&value);

    let before_ordinal = unit.instr(before).ordinal.unwrap_or(0);
    let uses: Vec<(InstrId, u8)> = {
        let mut out = Vec::new();
        for &instr_id in &unit.block(block).instrs.clone() {
            if instr_id == store_instr {
                continue;
            }
            let instr = unit.instr(instr_id).clone();
            if instr.ordinal.is_some_and(|o| o < before_ordinal) {
                // Already ran (against the original register) before this spill's store exists.
                continue;
            }
            for (slot, arg) in instr.args.iter().enumerate() {
                if *arg == Some(value) {
                    out.push((instr_id, slot as u8));
                }
            }
        }
        out
    };

    for (user_instr, slot) in uses {
        let pos = unit
            .block(block)
            .instrs
            .iter()
            .position(|&id| id == user_instr)
            .unwrap_or(0);
        let saved = unit.set_insert_pos(pos);
        let (_, reloaded) = unit.append(Opcode::LoadLocal { local, width }, width);
        unit.restore_insert_pos(saved);
        let reloaded = reloaded.expect("load_local always yields a result");
        unit.set_arg(user_instr, slot, reloaded);

        // Bring the pool's active set up to date for this use site first — otherwise
        // `evict_furthest` could pick an interval whose only remaining use is actually earlier in
        // the block than `user_instr` (already serviced, just not yet expired), and spilling it
        // "before user_instr" would place its store after a use it was supposed to cover.
        let ordinal = unit.instr(user_instr).ordinal.unwrap_or(0);
        pool.expire(ordinal);

        let reg = match pool.take_free() {
            Some(reg) => reg,
            None => {
                let (evicted_value, freed_reg) = pool
                    .evict_furthest()
                    .expect("pool has an active interval whenever it has no free register");
                spill_value(unit, evicted_value, user_instr, use_map, pool);
                freed_reg
            }
        };
        unit.set_reg(reloaded, Some(reg));
        pool.free.push(reg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;
    use nova_types::Width;

    #[test]
    fn every_non_constant_value_gets_a_register_when_supply_is_sufficient() {
        let mut b = IrBuilder::new();
        let c0 = b.load_context(0x10, Width::I32);
        let c1 = b.load_context(0x20, Width::I32);
        let sum = b.add(Width::I32, c0, c1);
        b.store_context(0x30, Width::I32, sum);

        let regs = RegisterFile::new(vec![0, 1, 2, 3], vec![0, 1], vec![0]);
        let spills = run(&mut b.unit, &regs);
        assert_eq!(spills, 0);

        assert!(b.unit.value(c0).reg.is_some());
        assert!(b.unit.value(c1).reg.is_some());
        assert!(b.unit.value(sum).reg.is_some());
    }

    #[test]
    fn spilling_kicks_in_when_live_values_exceed_register_supply() {
        let mut b = IrBuilder::new();
        // Four live-at-once int values with only one register available forces spills.
        let v0 = b.load_context(0x00, Width::I32);
        let v1 = b.load_context(0x04, Width::I32);
        let v2 = b.load_context(0x08, Width::I32);
        let v3 = b.load_context(0x0c, Width::I32);
        let s0 = b.add(Width::I32, v0, v1);
        let s1 = b.add(Width::I32, v2, v3);
        let total = b.add(Width::I32, s0, s1);
        b.store_context(0x10, Width::I32, total);

        let regs = RegisterFile::new(vec![0], vec![], vec![]);
        let spills = run(&mut b.unit, &regs);
        assert!(spills > 0, "single-register pool over four live values must spill");
    }

    #[test]
    fn an_earlier_use_of_a_spilled_value_is_left_untouched() {
        let mut b = IrBuilder::new();
        let v0 = b.load_context(0x00, Width::I32);
        let early_use = b.store_context(0x04, Width::I32, v0);
        let v1 = b.load_context(0x08, Width::I32);
        let v2 = b.load_context(0x0c, Width::I32);
        let t0 = b.add(Width::I32, v2, v1);
        let t1 = b.add(Width::I32, t0, v0);
        b.store_context(0x10, Width::I32, t1);

        let regs = RegisterFile::new(vec![0, 1], vec![], vec![]);
        let spills = run(&mut b.unit, &regs);
        assert_eq!(spills, 1, "v0 is the only value whose next use is far enough out to get evicted");

        assert_eq!(
            b.unit.instr(early_use).args[0],
            Some(v0),
            "a use that already ran before the spill must keep reading the original value directly, \
             not a reload of the spill slot the store hasn't written yet"
        );

        let t1_instr = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .copied()
            .find(|&id| b.unit.instr(id).result == Some(t1))
            .expect("t1 has a defining instruction");
        let rewritten_arg = b.unit.instr(t1_instr).args[1].expect("t1's second argument is present");
        assert_ne!(
            rewritten_arg, v0,
            "the later use must be rewritten to read the spill slot instead of v0 directly"
        );

        let reload_instr = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .copied()
            .find(|&id| b.unit.instr(id).result == Some(rewritten_arg))
            .expect("the rewritten argument has a defining instruction");
        assert!(
            matches!(b.unit.instr(reload_instr).opcode, Opcode::LoadLocal { .. }),
            "the later use must read through a load_local reload"
        );
    }

    #[test]
    fn a_reloaded_value_gets_its_own_register_instead_of_being_dropped() {
        let mut b = IrBuilder::new();
        let v0 = b.load_context(0x00, Width::I32);
        let v1 = b.load_context(0x04, Width::I32);
        let v2 = b.load_context(0x08, Width::I32);
        let v3 = b.load_context(0x0c, Width::I32);
        let s0 = b.add(Width::I32, v0, v1);
        let s1 = b.add(Width::I32, v2, v3);
        let total = b.add(Width::I32, s0, s1);
        b.store_context(0x10, Width::I32, total);

        let regs = RegisterFile::new(vec![0], vec![], vec![]);
        run(&mut b.unit, &regs);

        for block in b.unit.block_ids() {
            for &instr_id in &b.unit.block(block).instrs {
                for arg in b.unit.instr(instr_id).args.iter().flatten() {
                    let value = b.unit.value(*arg);
                    if !value.is_const() {
                        assert!(
                            value.reg.is_some(),
                            "a value read by a later instruction must have a register, whether \
                             from ordinary allocation or from a reload after a spill"
                        );
                    }
                }
            }
        }
    }
}
