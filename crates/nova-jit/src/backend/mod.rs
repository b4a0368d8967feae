//! Native-code backend (`spec.md` §4.5). The chosen host instruction set is WebAssembly: each
//! compiled guest block becomes one wasm function, the dispatcher table is a `wasmtime::Table` of
//! funcrefs, and the five thunks described in `spec.md` §4.5 are wasm functions emitted once at
//! backend init rather than hand-assembled machine code. See `DESIGN.md` for why wasm was picked
//! over a native x64/ARM64 encoder.

mod fault;
mod wasm;

pub use fault::{handle_exception, FaultState};
pub use wasm::{AssembledBlock, EmitEvent, LocalLayout, WasmBackend};

use nova_types::{RegClass, RegRole};

/// One entry in the backend's register descriptor table (`spec.md` §4.5): name, class, and role.
#[derive(Debug, Clone, Copy)]
pub struct RegDescriptor {
    pub name: &'static str,
    pub class: RegClass,
    pub role: RegRole,
}

/// `spec.md` §4.5: "a code buffer ... 4 KB page-aligned, at most a few MB". The wasm analogue is
/// the module's compiled byte budget; we still cap it so a pathological guest can't make the
/// engine hold an unbounded amount of generated code.
pub const MAX_MODULE_BYTES: usize = 8 * 1024 * 1024;
