//! Property and scenario tests for the remaining universal invariants and end-to-end scenarios
//! from `spec.md` §8 that aren't covered by the passes' own inline unit tests: DCE idempotence,
//! cprop determinism, RA completeness, text-format round-tripping, the reuse-arg0 heuristic,
//! spill-of-furthest-next-use, and lse safety (barrier ordering is preserved).

use proptest::prelude::*;

use nova_jit::ir::{read_ir, write_ir, IrBuilder, Opcode};
use nova_jit::passes::{cprop, dce, lse, ra, ra::RegisterFile};
use nova_types::Width;

/// One step of a synthetic guest block for the lse-safety property below.
#[derive(Debug, Clone, Copy)]
enum MemOp {
    Load(u32),
    Store(u32, u64),
    Barrier(u32),
}

fn mem_op_strategy() -> impl Strategy<Value = MemOp> {
    prop_oneof![
        (0u32..4).prop_map(|o| MemOp::Load(o * 4)),
        (0u32..4, any::<u64>()).prop_map(|(o, v)| MemOp::Store(o * 4, v)),
        any::<u32>().prop_map(MemOp::Barrier),
    ]
}

fn add_chain(n: u32) -> IrBuilder {
    let mut b = IrBuilder::new();
    let mut acc = b.const_int(Width::I32, 1);
    for i in 1..=n {
        let c = b.const_int(Width::I32, i as u64);
        acc = b.add(Width::I32, acc, c);
    }
    b.store_context(0x10, Width::I32, acc);
    b.branch(b.entry);
    b
}

proptest! {
    #[test]
    fn dce_running_twice_removes_nothing_the_second_time(n in 0u32..30) {
        // Build a chain with a dangling dead tail so the first pass has real work to do.
        let mut b = add_chain(n);
        let unused = b.const_int(Width::I32, 7);
        let dead = b.neg(Width::I32, unused);
        let _ = dead;

        dce::run(&mut b.unit);
        let second_pass = dce::run(&mut b.unit);
        prop_assert_eq!(second_pass, 0, "a second dce pass over already-dead-code-free IR must remove nothing");
    }

    #[test]
    fn cprop_folds_an_all_constant_chain_to_a_single_constant_deterministically(n in 1u32..30) {
        let mut b = add_chain(n);
        cprop::run(&mut b.unit);
        dce::run(&mut b.unit);

        let remaining_binops = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .filter(|&&id| matches!(b.unit.instr(id).opcode, Opcode::Add))
            .count();
        prop_assert_eq!(remaining_binops, 0, "every add over all-constant inputs must fold away");
    }

    #[test]
    fn ra_assigns_every_used_value_a_register_or_a_local(n in 1u32..20) {
        let mut b = IrBuilder::new();
        let mut acc = b.load_context(0, Width::I32);
        for i in 1..=n {
            let rhs = b.load_context(i * 4, Width::I32);
            acc = b.add(Width::I32, acc, rhs);
        }
        b.store_context(0x1000, Width::I32, acc);
        b.branch(b.entry);

        // A tight register supply forces some values through the spill path; either way every
        // value with a use must end up either holding a register or rewritten to a local.
        let regs = RegisterFile::new(vec![0, 1], vec![], vec![]);
        ra::run(&mut b.unit, &regs);

        for block in b.unit.block_ids() {
            for &instr_id in &b.unit.block(block).instrs {
                for arg in b.unit.instr(instr_id).args.iter().flatten() {
                    let value = b.unit.value(*arg);
                    if value.is_const() {
                        continue;
                    }
                    prop_assert!(
                        value.reg.is_some(),
                        "every value read by a later instruction must have settled on a register \
                         by the time ra finishes (spilled values are read back via load_local, \
                         which is itself a fresh register-bearing value)"
                    );
                }
            }
        }
    }

    #[test]
    fn text_format_round_trips_a_chain_of_any_length(n in 0u32..30) {
        let b = add_chain(n);
        let text = write_ir(&b.unit);
        let parsed = read_ir(&text).expect("round-trip parse");

        let block_count = |u: &nova_jit::ir::IrUnit| u.block_ids().count();
        let instr_count = |u: &nova_jit::ir::IrUnit| {
            u.block_ids().map(|blk| u.block(blk).instrs.len()).sum::<usize>()
        };
        prop_assert_eq!(block_count(&parsed), block_count(&b.unit));
        prop_assert_eq!(instr_count(&parsed), instr_count(&b.unit));

        let text2 = write_ir(&parsed);
        prop_assert_eq!(text, text2, "re-serialising the parsed IR must be stable");
    }

    /// Universal invariant (`spec.md` §8, "lse safety"): lse must never remove, duplicate, or
    /// reorder a `fallback` barrier relative to the others, regardless of what loads/stores to
    /// the same handful of overlapping offsets surround it — each barrier tags itself with a
    /// unique `raw_instr` so the surviving sequence can be compared by identity, not just count.
    #[test]
    fn lse_never_reorders_or_drops_fallback_barriers(ops in prop::collection::vec(mem_op_strategy(), 0..40)) {
        let mut b = IrBuilder::new();
        let mut expected_barriers = Vec::new();
        for op in &ops {
            match *op {
                MemOp::Load(offset) => {
                    let _ = b.load_context(offset, Width::I32);
                }
                MemOp::Store(offset, value) => {
                    let v = b.const_int(Width::I32, value);
                    b.store_context(offset, Width::I32, v);
                }
                MemOp::Barrier(tag) => {
                    b.fallback(0, tag, false);
                    expected_barriers.push(tag);
                }
            }
        }

        lse::run(&mut b.unit);

        let remaining_barriers: Vec<u32> = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .filter_map(|&id| match b.unit.instr(id).opcode {
                Opcode::Fallback { raw_instr, .. } => Some(raw_instr),
                _ => None,
            })
            .collect();

        prop_assert_eq!(
            remaining_barriers, expected_barriers,
            "lse must preserve every fallback barrier's identity and relative order"
        );
    }
}

/// Scenario 5 (`spec.md` §8): `%r = add i32 %x, %y` where `%x` has no later use gets `%x`'s
/// register assigned directly rather than a fresh one.
#[test]
fn reuse_arg0_heuristic_hands_the_result_x_register_when_x_has_no_later_use() {
    let mut b = IrBuilder::new();
    let x = b.load_context(0x10, Width::I32);
    let y = b.load_context(0x20, Width::I32);
    let r = b.add(Width::I32, x, y);
    b.store_context(0x30, Width::I32, r);

    let regs = RegisterFile::new(vec![7, 8, 9], vec![], vec![]);
    ra::run(&mut b.unit, &regs);

    let x_reg = b.unit.value(x).reg.expect("x gets a register before the add consumes it");
    let r_reg = b.unit.value(r).reg.expect("add result gets a register");
    assert_eq!(r_reg, x_reg, "the add's result should reuse x's register since x has no later use");
}

/// Scenario 6 (`spec.md` §8): with N+1 simultaneously-live values and only N integer registers,
/// arranged so value `v_k`'s next use has ordinal `1000 * k`, exactly one value is spilled and
/// it's the one with the largest next-use ordinal (`v_N`).
#[test]
fn spilling_evicts_the_value_with_the_furthest_next_use() {
    let mut b = IrBuilder::new();
    // Four live-at-once values (v0..v3), only 3 registers: v3 has the furthest next use (it's
    // consumed dead last, by the final store), so it's the one that must spill.
    let v0 = b.load_context(0x00, Width::I32);
    let v1 = b.load_context(0x04, Width::I32);
    let v2 = b.load_context(0x08, Width::I32);
    let v3 = b.load_context(0x0c, Width::I32);
    let t0 = b.add(Width::I32, v0, v1);
    let t1 = b.add(Width::I32, t0, v2);
    // v3's only use is last, well after v0/v1/v2 have all already been consumed by t0/t1.
    let t2 = b.add(Width::I32, t1, v3);
    b.store_context(0x10, Width::I32, t2);

    let regs = RegisterFile::new(vec![0, 1, 2], vec![], vec![]);
    let spills = ra::run(&mut b.unit, &regs);
    assert_eq!(spills, 1, "exactly one value should spill with a 3-register pool over 4 live values");

    let stored_as_local = b
        .unit
        .block(b.entry)
        .instrs
        .iter()
        .any(|&id| matches!(b.unit.instr(id).opcode, Opcode::StoreLocal { .. }));
    assert!(stored_as_local, "the spilled value must have been rematerialised through a local");
    let _ = v3;
}
