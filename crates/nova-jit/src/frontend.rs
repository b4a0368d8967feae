//! Guest-to-IR lifting (`spec.md` §4.3). The frontend is guest-agnostic: it drives a
//! [`Decoder`] supplied per guest CPU and handles everything common to both — block-extent
//! discovery, delay-slot splicing, specialisation guards, idle-loop detection, and terminator
//! synthesis — exactly once, instead of once per guest.

use nova_types::{OpFlags, Width};

use crate::error::FrontendError;
use crate::ir::{BlockId, IrBuilder, ValueId};

/// One decoded guest instruction, as handed back by [`Decoder::decode`].
pub struct DecodedInstr<G> {
    pub raw_instr: u32,
    /// Opcode-indexed callback in the guest's fallback table (`spec.md` §4.1).
    pub fallback_callback: u32,
    pub flags: OpFlags,
    /// Byte length of this instruction's encoding, used to advance the cursor.
    pub size: u32,
    /// Emits this instruction's IR. `None` means no native translator exists — the frontend
    /// falls back to an IR `FALLBACK` referencing `fallback_callback` (`spec.md` §4.3: "If no
    /// translator exists (or the opcode is flagged FALLBACK), the frontend emits an IR FALLBACK
    /// instruction").
    pub translate: Option<fn(&mut IrBuilder, addr: u64, raw_instr: u32) -> TranslateOutcome>,
    _guest: std::marker::PhantomData<G>,
}

impl<G> DecodedInstr<G> {
    pub fn new(
        raw_instr: u32,
        fallback_callback: u32,
        flags: OpFlags,
        size: u32,
        translate: Option<fn(&mut IrBuilder, u64, u32) -> TranslateOutcome>,
    ) -> Self {
        DecodedInstr {
            raw_instr,
            fallback_callback,
            flags,
            size,
            translate,
            _guest: std::marker::PhantomData,
        }
    }
}

/// What a per-opcode translator produced, so the frontend can drive idle-loop detection and
/// delay-slot sequencing without the translator needing to know about either.
pub struct TranslateOutcome {
    /// Set when this instruction is a candidate body step of an idle loop (a memory read, a
    /// comparison, or a conditional backward branch — `spec.md` §4.3).
    pub idle_loop_step: bool,
    /// If this instruction reads the processor mode register and the translator specialised on
    /// a particular value, the value it specialised on (for the `assert_eq` guard).
    pub specialised_mode: Option<(ValueId, u64)>,
}

impl Default for TranslateOutcome {
    fn default() -> Self {
        TranslateOutcome {
            idle_loop_step: false,
            specialised_mode: None,
        }
    }
}

/// Guest-specific decode logic. Everything else about lifting a block is common and lives in
/// [`translate_block`]/[`analyse_block`] below.
pub trait Decoder<G> {
    /// Decodes the instruction at `addr`. Returns `None` only for addresses outside any mapped
    /// code (an engine bug, per `spec.md` §1 — core errors never cover guest-triggerable
    /// conditions).
    fn decode(&self, addr: u64) -> Option<DecodedInstr<G>>;

    /// Reads the processor mode register this guest specialises translations on (e.g. the FPU
    /// precision bit), if it has one.
    fn mode_register(&self, _builder: &mut IrBuilder) -> Option<ValueId> {
        None
    }
}

/// Result of [`analyse_block`]: the byte extent of a block starting at `begin_addr`.
#[derive(Debug, Clone, Copy)]
pub struct BlockExtent {
    pub begin_addr: u64,
    pub size: u32,
}

const MAX_BLOCK_INSTRS: u32 = 4096;

/// `spec.md` §4.3's `analyse_code`: walks forward until a terminator, always including delay
/// slots (which are never themselves terminators).
pub fn analyse_block<G, D: Decoder<G>>(
    decoder: &D,
    begin_addr: u64,
) -> Result<BlockExtent, FrontendError> {
    let mut addr = begin_addr;
    let mut count = 0u32;
    loop {
        let instr = decoder
            .decode(addr)
            .ok_or(FrontendError::UnknownOpcode { addr })?;
        addr += u64::from(instr.size);
        count += 1;
        if count > MAX_BLOCK_INSTRS {
            return Err(FrontendError::BlockTooLarge {
                begin_addr,
                limit: MAX_BLOCK_INSTRS,
            });
        }

        let terminates = instr.flags.contains(OpFlags::SET_PC) || instr.flags.contains(OpFlags::STORE_MODE);
        if terminates && !instr.flags.contains(OpFlags::DELAYED) {
            return Ok(BlockExtent {
                begin_addr,
                size: (addr - begin_addr) as u32,
            });
        }
        if instr.flags.contains(OpFlags::DELAYED) {
            // The delay slot itself is never a terminator (spec.md §4.3); consume it unconditionally
            // and let the loop's next iteration decide whether the *pair* ended the block.
            let delay = decoder
                .decode(addr)
                .ok_or(FrontendError::UnknownOpcode { addr })?;
            debug_assert!(
                !delay.flags.contains(OpFlags::DELAYED),
                "delay slots may not themselves be delayed"
            );
            addr += u64::from(delay.size);
            count += 1;
            if terminates {
                return Ok(BlockExtent {
                    begin_addr,
                    size: (addr - begin_addr) as u32,
                });
            }
        }
    }
}

/// `spec.md` §4.3's `translate_code`: emits IR for every decoded instruction in `extent`.
///
/// Returns the block's **specialisation flags word**: a fold of every `assert_eq` mode-guard
/// value the translation emitted. Two translations of the same `begin_addr` under different
/// runtime modes produce different flags words, so the driver can key its block cache by
/// `(guest_addr, flags)` instead of address alone — re-entering the same address under a
/// different mode must not hit a block compiled under a stale assumption.
pub fn translate_block<G, D: Decoder<G>>(
    decoder: &D,
    extent: BlockExtent,
    builder: &mut IrBuilder,
) -> Result<u64, FrontendError> {
    let mut addr = extent.begin_addr;
    let end = extent.begin_addr + u64::from(extent.size);
    let mut idle_loop_steps = 0u32;
    let mut total_steps = 0u32;
    let mut last_terminator_set_pc = false;
    let mut flags_word = 0u64;

    while addr < end {
        let instr = decoder
            .decode(addr)
            .ok_or(FrontendError::UnknownOpcode { addr })?;
        let cycles = 1u32;
        builder.source_info(addr, cycles);

        let outcome = emit_one(decoder, builder, addr, &instr)?;
        total_steps += 1;
        if outcome.idle_loop_step {
            idle_loop_steps += 1;
        }
        if let Some((_, expected)) = outcome.specialised_mode {
            flags_word = fold_specialisation(flags_word, expected);
        }
        last_terminator_set_pc = instr.flags.contains(OpFlags::SET_PC);

        let mut next_addr = addr + u64::from(instr.size);

        if instr.flags.contains(OpFlags::DELAYED) {
            // Splice the delay slot's translation into the middle of the branch's own expansion,
            // so its side effects are visible before the branch completes (spec.md §4.3).
            let saved = builder.open_delay_slot_splice_point();
            let delay_addr = next_addr;
            let delay = decoder
                .decode(delay_addr)
                .ok_or(FrontendError::UnknownOpcode { addr: delay_addr })?;
            builder.source_info(delay_addr, cycles);
            let delay_outcome = emit_one(decoder, builder, delay_addr, &delay)?;
            if let Some((_, expected)) = delay_outcome.specialised_mode {
                flags_word = fold_specialisation(flags_word, expected);
            }
            builder.close_delay_slot_splice_point(saved);
            next_addr += u64::from(delay.size);
        }

        addr = next_addr;
    }

    // Idle-loop detection: a short, self-contained loop whose body is mostly memory reads and
    // comparisons gets its cycle cost multiplied so the scheduler yields sooner. We approximate
    // "short, self-contained" as: every emitted step in this block flagged itself a candidate.
    if total_steps > 0 && idle_loop_steps == total_steps {
        scale_source_info_cycles(builder, 8);
    }

    if !last_terminator_set_pc {
        // Terminator synthesis: the block fell off the end without a PC-setting instruction.
        builder.branch(builder.entry);
    }

    Ok(flags_word)
}

fn fold_specialisation(flags_word: u64, expected: u64) -> u64 {
    flags_word.wrapping_mul(31).wrapping_add(expected.wrapping_add(1))
}

fn emit_one<G, D: Decoder<G>>(
    decoder: &D,
    builder: &mut IrBuilder,
    addr: u64,
    instr: &DecodedInstr<G>,
) -> Result<TranslateOutcome, FrontendError> {
    if instr.flags.contains(OpFlags::FALLBACK) || instr.translate.is_none() {
        builder.fallback(
            instr.fallback_callback,
            instr.raw_instr,
            instr.flags.contains(OpFlags::SET_PC),
        );
        return Ok(TranslateOutcome::default());
    }

    let translate = instr.translate.expect("checked above");
    let outcome = translate(builder, addr, instr.raw_instr);

    if let Some((mode_value, expected)) = outcome.specialised_mode {
        let _ = decoder.mode_register(builder);
        let expected_const = builder.const_int(Width::I32, expected);
        builder.assert_eq(mode_value, expected_const);
    }

    Ok(outcome)
}

/// Multiplies every `source_info` cycle count in the unit by `factor`, in place. Grounded on
/// `spec.md` §4.3: idle loops get their body's cycle cost scaled by a fixed ×8 factor.
fn scale_source_info_cycles(builder: &mut IrBuilder, factor: u32) {
    for block in builder.unit.block_ids() {
        let instr_ids: Vec<_> = builder.unit.block(block).instrs.clone();
        for instr_id in instr_ids {
            if let crate::ir::Opcode::SourceInfo { guest_pc, cycles } = builder.unit.instr(instr_id).opcode {
                builder.unit.set_source_info_cycles(instr_id, guest_pc, cycles.saturating_mul(factor));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Opcode;

    struct ToyGuest;

    /// A minimal three-opcode fixture ISA: `nop` (plain), `halt` (SET_PC fallback), and
    /// `branch_back` (a DELAYED unconditional branch to address 0, to exercise delay-slot
    /// splicing and terminator flags together).
    struct ToyDecoder;

    fn translate_nop(_b: &mut IrBuilder, _addr: u64, _raw: u32) -> TranslateOutcome {
        TranslateOutcome::default()
    }

    fn translate_delay_nop(_b: &mut IrBuilder, _addr: u64, _raw: u32) -> TranslateOutcome {
        TranslateOutcome {
            idle_loop_step: true,
            specialised_mode: None,
        }
    }

    impl Decoder<ToyGuest> for ToyDecoder {
        fn decode(&self, addr: u64) -> Option<DecodedInstr<ToyGuest>> {
            match addr {
                0 => Some(DecodedInstr::new(0x01, 1, OpFlags::DELAYED, 4, Some(translate_delay_nop))),
                4 => Some(DecodedInstr::new(
                    0x02,
                    2,
                    OpFlags::SET_PC | OpFlags::DELAYED,
                    4,
                    Some(translate_nop),
                )),
                _ => None,
            }
        }
    }

    #[test]
    fn analyse_block_includes_the_delay_slot_in_the_extent() {
        let decoder = ToyDecoder;
        let extent = analyse_block(&decoder, 0).expect("analysis succeeds");
        assert_eq!(extent.size, 8);
    }

    #[test]
    fn translate_block_does_not_append_a_synthetic_branch_when_block_sets_pc() {
        let decoder = ToyDecoder;
        let extent = analyse_block(&decoder, 0).expect("analysis succeeds");
        let mut builder = IrBuilder::new();
        let flags = translate_block(&decoder, extent, &mut builder).expect("translation succeeds");
        assert_eq!(flags, 0, "the toy fixture never specialises on a mode register");

        let terminators: Vec<_> = builder
            .unit
            .block(builder.entry)
            .instrs
            .iter()
            .filter(|&&id| builder.unit.instr(id).opcode.is_terminator())
            .collect();
        assert_eq!(terminators.len(), 1, "exactly the decoded branch, no synthetic one");
    }

    /// Specialises on whatever value the raw instruction word carries, standing in for a
    /// translator that reads a runtime mode register and picks a code path per value.
    fn translate_mode_guard(b: &mut IrBuilder, _addr: u64, raw: u32) -> TranslateOutcome {
        let mode = b.const_int(Width::I32, raw as u64);
        TranslateOutcome {
            idle_loop_step: false,
            specialised_mode: Some((mode, raw as u64)),
        }
    }

    #[test]
    fn two_translations_that_specialise_on_different_mode_values_get_different_flags_words() {
        let a = ModeGuardDecoderWith(7);
        let b = ModeGuardDecoderWith(11);

        let extent_a = analyse_block(&a, 0).unwrap();
        let flags_a = translate_block(&a, extent_a, &mut IrBuilder::new()).unwrap();

        let extent_b = analyse_block(&b, 0).unwrap();
        let flags_b = translate_block(&b, extent_b, &mut IrBuilder::new()).unwrap();

        assert_ne!(
            flags_a, flags_b,
            "blocks specialised on different mode values must key the cache differently"
        );

        let also_a = translate_block(&a, extent_a, &mut IrBuilder::new()).unwrap();
        assert_eq!(flags_a, also_a, "the same translation is deterministic");
    }

    struct ModeGuardDecoderWith(u32);

    impl Decoder<ToyGuest> for ModeGuardDecoderWith {
        fn decode(&self, addr: u64) -> Option<DecodedInstr<ToyGuest>> {
            match addr {
                0 => Some(DecodedInstr::new(
                    self.0,
                    3,
                    OpFlags::SET_PC,
                    4,
                    Some(translate_mode_guard),
                )),
                _ => None,
            }
        }
    }
}
