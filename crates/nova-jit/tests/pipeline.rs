//! End-to-end: build IR by hand (standing in for a frontend translation), run the full
//! optimisation pipeline, assemble it to wasm, and check the module the backend produced is
//! actually well-formed wasm.

use nova_jit::backend::{LocalLayout, WasmBackend};
use nova_jit::ir::IrBuilder;
use nova_jit::passes::{self, RegisterFile};
use nova_types::Width;

fn register_file() -> RegisterFile {
    RegisterFile::new(vec![0, 1, 2, 3], vec![0, 1], vec![0])
}

#[test]
fn a_block_that_adds_two_context_fields_and_stores_the_result_assembles_to_valid_wasm() {
    let mut b = IrBuilder::new();

    b.source_info(0x8c00_0000, 2);
    let lhs = b.load_context(0, Width::I32);
    let rhs = b.load_context(4, Width::I32);
    let zero = b.const_int(Width::I32, 0);
    // `x + 0` should be simplified away by `esimp`, leaving just the redundant add below folded
    // by nothing (non-constant operands) but still eliminated as dead if unused.
    let _unused = b.add(Width::I32, rhs, zero);
    let sum = b.add(Width::I32, lhs, rhs);
    b.store_context(8, Width::I32, sum);
    b.branch(b.entry);

    let stats = passes::run_all(&mut b.unit, &register_file());
    assert!(stats.dce_removed >= 1, "the unused add should be swept by dce");

    let layout = LocalLayout {
        int_count: 4,
        float_count: 2,
        vector_count: 1,
    };
    let assembled = WasmBackend::new()
        .assemble(&b.unit, &layout)
        .expect("a two-field add lowers cleanly");

    let mut validator = wasmparser::Validator::new();
    validator
        .validate_all(&assembled.module)
        .expect("backend must emit a spec-valid wasm module");

    assert!(
        assembled.events.iter().any(|e| matches!(
            e,
            nova_jit::backend::EmitEvent::Instr { guest_pc, .. } if *guest_pc == 0x8c00_0000
        )),
        "the source_info marker should surface as an emit event for the dispatcher's pc map"
    );
}

#[test]
fn a_block_with_more_live_values_than_registers_still_assembles_after_spilling() {
    let mut b = IrBuilder::new();

    let base = b.load_context(0, Width::I32);
    let mut values = Vec::new();
    for i in 0..8u32 {
        let c = b.const_int(Width::I32, i as u64 + 1);
        values.push(b.add(Width::I32, base, c));
    }
    let mut acc = values[0];
    for v in &values[1..] {
        acc = b.add(Width::I32, acc, *v);
    }
    b.store_context(4, Width::I32, acc);
    b.branch(b.entry);

    // Only two integer registers: forces the allocator to spill.
    let regs = RegisterFile::new(vec![0, 1], vec![0], vec![]);
    let stats = passes::run_all(&mut b.unit, &regs);
    assert!(stats.ra_spills > 0, "two registers can't cover nine live values");

    let layout = LocalLayout {
        int_count: 2,
        float_count: 1,
        vector_count: 0,
    };
    let assembled = WasmBackend::new()
        .assemble(&b.unit, &layout)
        .expect("spilled blocks must still assemble");

    let mut validator = wasmparser::Validator::new();
    validator.validate_all(&assembled.module).unwrap();
}
