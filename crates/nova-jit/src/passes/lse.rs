//! Load/store elimination over `load_context`/`store_context` pairs (`spec.md` §4.4.1).
//!
//! Scoped to the guest-context byte range (as opposed to locals or guest memory, which the
//! register allocator and the backend's fastmem path respectively already handle soundly without
//! this pass's help). State is a sparse map from offset to `(width_bytes, value)`; writing a
//! value at `offset..offset+width` tombstones any entry whose range overlaps, so a wider later
//! read that only partially overlaps an earlier write correctly misses rather than returning a
//! stale narrow value.

use std::collections::HashMap;

use crate::ir::{BlockId, Instruction, InstrId, IrUnit, Opcode, ValueId};

#[derive(Debug, Clone, Copy)]
struct Avail {
    offset: u32,
    width: u32,
    value: ValueId,
}

type AvailMap = HashMap<u32, Avail>;

fn width_bytes(w: nova_types::Width) -> u32 {
    w.bytes().unwrap_or(0)
}

fn overlaps(a_off: u32, a_w: u32, b_off: u32, b_w: u32) -> bool {
    a_off < b_off + b_w && b_off < a_off + a_w
}

fn kill_range(state: &mut AvailMap, offset: u32, width: u32) {
    state.retain(|_, a| !overlaps(a.offset, a.width, offset, width));
}

/// Runs both the forward (redundant load) and backward (dead store) sub-passes. Returns
/// `(loads_eliminated, stores_eliminated)`.
pub fn run(unit: &mut IrUnit) -> (usize, usize) {
    let loads = forward(unit);
    let stores = backward(unit);
    (loads, stores)
}

/// Forward pass: eliminates a `load_context(o)` that is provably reading a value already known
/// from an earlier `store_context(o, v)` in the same dominating path. Inter-block propagation
/// walks the CFG depth-first with a stack of states that is pushed on entry to a block and popped
/// on return, per `spec.md` §4.4.1; a block is only descended into once, so back-edges are
/// treated conservatively (the loop body starts from an empty state on its second and later
/// visits) rather than iterated to a fixed point.
fn forward(unit: &mut IrUnit) -> usize {
    let mut eliminated = 0;
    let mut visited = vec![false; unit.block_ids().count()];
    let entry = unit.block_ids().next();
    if let Some(entry) = entry {
        let mut stack = vec![AvailMap::new()];
        forward_visit(unit, entry, &mut stack, &mut visited, &mut eliminated);
    }
    eliminated
}

fn forward_visit(
    unit: &mut IrUnit,
    block: BlockId,
    stack: &mut Vec<AvailMap>,
    visited: &mut [bool],
    eliminated: &mut usize,
) {
    if visited[block.index()] {
        return;
    }
    visited[block.index()] = true;

    let mut state = stack.last().cloned().unwrap_or_default();

    let instr_ids: Vec<InstrId> = unit.block(block).instrs.clone();
    for instr_id in instr_ids {
        let instr = unit.instr(instr_id).clone();
        match instr.opcode {
            Opcode::LoadContext { offset, width } => {
                let w = width_bytes(width);
                if let Some(avail) = state.get(&offset).copied() {
                    if avail.offset == offset && avail.width == w {
                        if let Some(result) = instr.result {
                            unit.replace_value(result, avail.value);
                            unit.remove_instr(instr_id);
                            *eliminated += 1;
                        }
                        continue;
                    }
                }
                if let Some(result) = instr.result {
                    state.insert(
                        offset,
                        Avail {
                            offset,
                            width: w,
                            value: result,
                        },
                    );
                }
            }
            Opcode::StoreContext { offset, width } => {
                let w = width_bytes(width);
                kill_range(&mut state, offset, w);
                if let Some(value) = instr.args[0] {
                    state.insert(offset, Avail { offset, width: w, value });
                }
            }
            op if op.is_lse_barrier() => state.clear(),
            _ => {}
        }
    }

    let only_local_branch_targets = local_branch_targets(unit, block);
    if only_local_branch_targets.is_none() {
        state.clear();
    }
    let targets = only_local_branch_targets.unwrap_or_default();

    stack.push(state);
    for dst in targets {
        forward_visit(unit, dst, stack, visited, eliminated);
    }
    stack.pop();
}

/// `Some(targets)` if every outgoing edge of `block` is a plain intra-unit branch (so the state
/// can be soundly propagated); `None` if the block ends on something else (reset point).
fn local_branch_targets(unit: &IrUnit, block: BlockId) -> Option<Vec<BlockId>> {
    let outgoing = &unit.block(block).outgoing;
    if outgoing.is_empty() {
        return Some(Vec::new());
    }
    let mut targets = Vec::with_capacity(outgoing.len());
    for &edge_id in outgoing {
        targets.push(unit.edge(edge_id).dst);
    }
    Some(targets)
}

/// Backward pass: eliminates a `store_context(o, v)` that is dead because, on every path forward
/// from it, a later store of equal-or-greater width at the same offset is observed with no
/// intervening load. Blocks are visited in reverse postorder so that a block's successors are
/// always processed first; the state flowing into the tail of a block is the intersection (by
/// offset, keeping the narrower width) of its successors' entry states, per `spec.md` §4.4.1's
/// join rule, symmetric to `forward`'s stack-based propagation. A successor not yet processed (a
/// back edge into a loop still being walked) or a block with no successors contributes no
/// guarantee, matching `forward`'s conservative treatment of back edges.
fn backward(unit: &mut IrUnit) -> usize {
    let mut eliminated = 0;

    let mut postorder = Vec::with_capacity(unit.block_ids().count());
    let mut visited = vec![false; unit.block_ids().count()];
    for block in unit.block_ids().collect::<Vec<_>>() {
        postorder_visit(unit, block, &mut visited, &mut postorder);
    }

    let mut entry_states: HashMap<BlockId, AvailMap> = HashMap::new();
    for block in postorder {
        let exit_state = successor_join(unit, block, &entry_states);
        let entry_state = backward_block(unit, block, exit_state, &mut eliminated);
        entry_states.insert(block, entry_state);
    }

    eliminated
}

fn postorder_visit(unit: &IrUnit, block: BlockId, visited: &mut [bool], out: &mut Vec<BlockId>) {
    if visited[block.index()] {
        return;
    }
    visited[block.index()] = true;
    for &edge_id in &unit.block(block).outgoing {
        postorder_visit(unit, unit.edge(edge_id).dst, visited, out);
    }
    out.push(block);
}

/// Intersects the already-computed entry states of `block`'s successors (by offset, keeping the
/// narrower width when they disagree). Empty if `block` has no successors, or if any successor
/// hasn't been processed yet.
fn successor_join(unit: &IrUnit, block: BlockId, computed: &HashMap<BlockId, AvailMap>) -> AvailMap {
    let outgoing = &unit.block(block).outgoing;
    if outgoing.is_empty() {
        return AvailMap::new();
    }

    let mut states = Vec::with_capacity(outgoing.len());
    for &edge_id in outgoing {
        match computed.get(&unit.edge(edge_id).dst) {
            Some(state) => states.push(state),
            None => return AvailMap::new(),
        }
    }

    let mut merged = states[0].clone();
    for state in &states[1..] {
        merged.retain(|offset, _| state.contains_key(offset));
        for (offset, avail) in merged.iter_mut() {
            if let Some(other) = state.get(offset) {
                avail.width = avail.width.min(other.width);
            }
        }
    }
    merged
}

/// Scans `block` in reverse starting from `state` (the join of its successors' entry states),
/// eliminating superseded stores, and returns the resulting entry state for `block`.
fn backward_block(unit: &mut IrUnit, block: BlockId, mut state: AvailMap, eliminated: &mut usize) -> AvailMap {
    let instr_ids: Vec<InstrId> = unit.block(block).instrs.clone();
    for &instr_id in instr_ids.iter().rev() {
        let instr: Instruction = unit.instr(instr_id).clone();
        match instr.opcode {
            Opcode::StoreContext { offset, width } => {
                let w = width_bytes(width);
                let superseded = state
                    .get(&offset)
                    .map(|a| a.offset == offset && a.width >= w)
                    .unwrap_or(false);
                if superseded {
                    unit.remove_instr(instr_id);
                    *eliminated += 1;
                } else {
                    state.insert(
                        offset,
                        Avail {
                            offset,
                            width: w,
                            value: instr.args[0].unwrap_or(ValueId(0)),
                        },
                    );
                }
            }
            Opcode::LoadContext { offset, width } => {
                kill_range(&mut state, offset, width_bytes(width));
            }
            op if op.is_lse_barrier() => state.clear(),
            _ => {}
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;
    use nova_types::Width;

    #[test]
    fn redundant_load_after_store_is_eliminated() {
        let mut b = IrBuilder::new();
        let v = b.const_int(Width::I32, 42);
        b.store_context(0x10, Width::I32, v);
        let loaded = b.load_context(0x10, Width::I32);
        b.store_context(0x20, Width::I32, loaded);

        let (loads, _stores) = run(&mut b.unit);
        assert_eq!(loads, 1);

        let remaining_loads = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .filter(|&&id| matches!(b.unit.instr(id).opcode, Opcode::LoadContext { .. }))
            .count();
        assert_eq!(remaining_loads, 0);
    }

    #[test]
    fn dead_store_shadowed_by_a_later_store_is_eliminated() {
        let mut b = IrBuilder::new();
        let v1 = b.const_int(Width::I32, 1);
        let v2 = b.const_int(Width::I32, 2);
        b.store_context(0x10, Width::I32, v1);
        b.store_context(0x10, Width::I32, v2);

        let (_loads, stores) = run(&mut b.unit);
        assert_eq!(stores, 1);
    }

    #[test]
    fn aliasing_store_of_narrower_width_does_not_hide_a_wider_later_read() {
        let mut b = IrBuilder::new();
        let v = b.const_int(Width::I32, 0xaabb);
        b.store_context(0x10, Width::I32, v);
        let narrow = b.const_int(Width::I8, 0xff);
        b.store_context(0x10, Width::I8, narrow);
        // A 4-byte read at 0x10 must not be served from the stale 4-byte entry, since a narrower
        // write has since landed inside its range.
        let _ = b.load_context(0x10, Width::I32);

        let (loads, _) = run(&mut b.unit);
        assert_eq!(loads, 0, "the i32 write is shadowed/partially overlapped; must not forward");
    }

    #[test]
    fn a_store_overwritten_on_every_successor_path_is_eliminated_across_blocks() {
        let mut b = IrBuilder::new();
        let tail = b.new_block();

        let v1 = b.const_int(Width::I32, 1);
        b.store_context(0x10, Width::I32, v1);
        b.branch(tail);

        b.set_insert_point(tail);
        let v2 = b.const_int(Width::I32, 2);
        b.store_context(0x10, Width::I32, v2);
        b.branch(b.entry);

        let (_loads, stores) = run(&mut b.unit);
        assert_eq!(
            stores, 1,
            "the entry block's store is dead: its only successor overwrites the same offset \
             before any load, so the join across the branch must catch it even though the two \
             stores live in different blocks"
        );

        let entry_stores = b
            .unit
            .block(b.entry)
            .instrs
            .iter()
            .filter(|&&id| matches!(b.unit.instr(id).opcode, Opcode::StoreContext { .. }))
            .count();
        assert_eq!(entry_stores, 0, "the entry block's dead store must be the one removed");
    }

    #[test]
    fn fallback_resets_available_state() {
        let mut b = IrBuilder::new();
        let v = b.const_int(Width::I32, 5);
        b.store_context(0x10, Width::I32, v);
        b.fallback(0, 0xdead_beef, false);
        let _ = b.load_context(0x10, Width::I32);

        let (loads, _) = run(&mut b.unit);
        assert_eq!(loads, 0, "fallback is an absolute barrier");
    }
}
