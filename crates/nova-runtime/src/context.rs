//! Fixed-layout guest context block: the four integer fields every guest exposes at known byte
//! offsets (`spec.md` §4.1/§6), backing the `ctx` memory import the wasm backend reads and writes.

use nova_jit::guest::ContextLayout;

/// Owns the raw bytes the JITted code's `ctx` import is bound to. Field accessors go through
/// `ContextLayout`'s offsets rather than a Rust struct so the layout matches whatever a
/// `GuestAdapter` declares, including guests that pack extra fields between the four fixed ones.
pub struct ContextBlock {
    layout: ContextLayout,
    bytes: Vec<u8>,
}

impl ContextBlock {
    pub fn new(layout: ContextLayout, size: usize) -> Self {
        ContextBlock {
            layout,
            bytes: vec![0u8; size],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn pc(&self) -> u64 {
        self.read_u32(self.layout.pc) as u64
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.write_u32(self.layout.pc, pc);
    }

    pub fn cycles(&self) -> u32 {
        self.read_u32(self.layout.cycles)
    }

    pub fn set_cycles(&mut self, cycles: u32) {
        self.write_u32(self.layout.cycles, cycles);
    }

    pub fn instrs(&self) -> u32 {
        self.read_u32(self.layout.instrs)
    }

    pub fn interrupts(&self) -> u32 {
        self.read_u32(self.layout.interrupts)
    }

    pub fn set_interrupts(&mut self, value: u32) {
        self.write_u32(self.layout.interrupts, value);
    }

    fn read_u32(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        let slice = &self.bytes[offset..offset + 4];
        u32::from_le_bytes(slice.try_into().expect("4-byte slice"))
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        let offset = offset as usize;
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}
