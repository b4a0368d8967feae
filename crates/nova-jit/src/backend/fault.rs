//! Fault classification (`spec.md` §4.5's `handle_exception`, §4.6's fault routing).
//!
//! With a wasm backend, "a host memory fault inside JITted code" is a wasmtime trap rather than a
//! POSIX signal: an out-of-bounds access on the imported `mem`/`ctx` memories. The runtime's fault
//! handler classifies the trap and decides whether it's a fastmem miss the backend understands
//! (recoverable — retry without fastmem) or something else (propagate).

/// Minimal description of a trapped wasm call, enough to classify it without needing the
/// wasmtime `Trap`/`Backtrace` types at this layer.
#[derive(Debug, Clone, Copy)]
pub struct FaultState {
    pub faulting_table_index: u32,
    pub memory_out_of_bounds: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A fastmem miss the backend understands; the driver should clear the block's fastmem flag
    /// and recompile it through the MMIO-aware path.
    Handled,
    Propagate,
}

/// `spec.md` §4.5: "it decides whether the fault is a fastmem miss it understands. If yes ...
/// returns true. If no, false." A wasm out-of-bounds memory trap against the `mem` import is
/// exactly the fastmem-miss case; anything else (a bad function index, stack overflow, ...) is
/// not ours to handle.
pub fn handle_exception(state: FaultState) -> FaultOutcome {
    if state.memory_out_of_bounds {
        FaultOutcome::Handled
    } else {
        FaultOutcome::Propagate
    }
}
