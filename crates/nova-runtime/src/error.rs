//! Driver-level error surface (`spec.md` §4.6, §7). Frontend/backend failures are folded in via
//! `#[from]` so callers of `jit_compile_block` get one error type to match on.

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("code cache exhausted before block at {guest_addr:#x} could be installed")]
    CodeBufferExhausted { guest_addr: u64 },

    #[error("no compiled block registered at fault pc {guest_addr:#x}")]
    NoBlockAtFaultPc { guest_addr: u64 },

    #[error(transparent)]
    Frontend(#[from] nova_jit::error::FrontendError),

    #[error(transparent)]
    Backend(#[from] nova_jit::error::BackendError),
}
