//! Runtime-level fault routing: classifies a trap via [`nova_jit::backend::fault`] and, when it's
//! a recoverable fastmem miss, tells the driver which block to demote and recompile
//! (`spec.md` §4.6).

pub use nova_jit::backend::fault::{handle_exception, FaultOutcome, FaultState};

use crate::error::DriverError;

/// What the driver should do in response to a trapped call into JITted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Demote the block at this guest address to the MMIO-aware path and recompile it.
    DemoteAndRecompile { guest_addr: u64 },
    /// Not ours: the caller should re-raise whatever this trap represents.
    Propagate,
}

/// Looks up the block that owns `faulting_table_index` and, if the trap is a fastmem miss,
/// returns the action the driver should take. `NoBlockAtFaultPc` surfaces a trap against a table
/// index the driver no longer has a block for — stale dispatcher state, not a guest bug.
pub fn route(
    state: FaultState,
    guest_addr_of: impl Fn(u32) -> Option<u64>,
) -> Result<FaultAction, DriverError> {
    match handle_exception(state) {
        FaultOutcome::Propagate => Ok(FaultAction::Propagate),
        FaultOutcome::Handled => {
            let guest_addr =
                guest_addr_of(state.faulting_table_index).ok_or(DriverError::NoBlockAtFaultPc {
                    guest_addr: state.faulting_table_index as u64,
                })?;
            Ok(FaultAction::DemoteAndRecompile { guest_addr })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fastmem_miss_with_a_known_owner_demotes_that_block() {
        let state = FaultState {
            faulting_table_index: 7,
            memory_out_of_bounds: true,
        };
        let action = route(state, |idx| if idx == 7 { Some(0x8c00_1000) } else { None }).unwrap();
        assert_eq!(
            action,
            FaultAction::DemoteAndRecompile {
                guest_addr: 0x8c00_1000
            }
        );
    }

    #[test]
    fn a_fastmem_miss_with_no_known_owner_is_an_error() {
        let state = FaultState {
            faulting_table_index: 7,
            memory_out_of_bounds: true,
        };
        let err = route(state, |_| None).unwrap_err();
        assert!(matches!(err, DriverError::NoBlockAtFaultPc { .. }));
    }

    #[test]
    fn a_non_memory_trap_propagates_without_consulting_the_registry() {
        let state = FaultState {
            faulting_table_index: 7,
            memory_out_of_bounds: false,
        };
        let action = route(state, |_| panic!("should not be called")).unwrap();
        assert_eq!(action, FaultAction::Propagate);
    }
}
