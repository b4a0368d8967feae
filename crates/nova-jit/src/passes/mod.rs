//! Optimisation passes, run in the fixed order `lse → cprop → esimp → dce → ra` (`spec.md` §4.4).
//! All passes mutate the unit in place; none allocate new blocks or change the block graph.

pub mod cprop;
pub mod dce;
pub mod esimp;
pub mod lse;
pub mod ra;

pub use ra::RegisterFile;

use crate::ir::IrUnit;

/// Per-pass elimination counters, logged at `debug` level and handy for tests that want to assert
/// a pass actually did something rather than merely not crashing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassStats {
    pub lse_loads_eliminated: usize,
    pub lse_stores_eliminated: usize,
    pub cprop_folded: usize,
    pub esimp_simplified: usize,
    pub dce_removed: usize,
    pub ra_spills: usize,
}

/// Runs the full fixed-order pipeline over `unit`, using `regs` to partition physical registers
/// for the final `ra` stage.
pub fn run_all(unit: &mut IrUnit, regs: &RegisterFile) -> PassStats {
    let mut stats = PassStats::default();

    let (loads, stores) = lse::run(unit);
    stats.lse_loads_eliminated = loads;
    stats.lse_stores_eliminated = stores;
    tracing::debug!(loads, stores, "lse");

    stats.cprop_folded = cprop::run(unit);
    tracing::debug!(folded = stats.cprop_folded, "cprop");

    stats.esimp_simplified = esimp::run(unit);
    tracing::debug!(simplified = stats.esimp_simplified, "esimp");

    stats.dce_removed = dce::run(unit);
    tracing::debug!(removed = stats.dce_removed, "dce");

    stats.ra_spills = ra::run(unit, regs);
    tracing::debug!(spills = stats.ra_spills, "ra");

    stats
}
