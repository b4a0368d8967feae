use thiserror::Error;

/// Errors from lifting a guest block into IR (`spec.md` §7).
///
/// `UnknownOpcode` is reserved for the case where even the guest's fallback table has no entry
/// for a decoded opcode. The contract (`spec.md` §4.1) guarantees a fallback always exists, so
/// translation is effectively infallible in practice; the variant is kept for the type's sake,
/// mirroring `CodegenError`'s shape in the traits this crate's backend error is grounded on.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("no decode for guest address {addr:#x}")]
    UnknownOpcode { addr: u64 },
    #[error("block starting at {begin_addr:#x} exceeded the {limit}-instruction limit")]
    BlockTooLarge { begin_addr: u64, limit: u32 },
}

/// Errors from assembling IR to native code (`spec.md` §4.5, §7).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("code buffer exhausted")]
    CodeBufferExhausted,
    #[error("generated module failed validation: {0}")]
    ModuleValidation(String),
    #[error("wasmtime error: {0}")]
    Wasmtime(String),
}
