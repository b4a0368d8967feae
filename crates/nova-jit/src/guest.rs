//! The guest adapter: a passive record supplied by each guest CPU and threaded through the
//! frontend and backend by reference (`spec.md` §4.1). This is the only place the core is allowed
//! to know anything guest-specific; everything else in `nova-jit` is guest-agnostic.

use nova_types::Width;

/// Opaque address-space token passed verbatim to memory callbacks. Guests that model a single
/// linear space can use `()`; guests with multiple address spaces (e.g. a banked-mode MMU) can
/// plug in whatever token their memory map needs.
pub trait AddrSpace: Copy {}
impl<T: Copy> AddrSpace for T {}

/// Either a direct host pointer into fastmem, or an MMIO callback pair plus the region-relative
/// offset to pass to it. Returned by [`GuestAdapter::lookup`].
pub enum MemTarget<'a, S> {
    Direct(*mut u8),
    Mmio {
        read: &'a dyn Fn(S, u64, Width) -> u64,
        write: &'a dyn Fn(S, u64, Width, u64),
        offset: u64,
    },
}

/// Byte offsets of the four fixed fields the core reads or writes directly in the guest context
/// (`spec.md` §6: "the guest adapter's four integer offsets ... are the only fields the core
/// reads or writes directly"). Everything else is only ever touched via `load_context`/
/// `store_context` IR emitted by per-opcode translators.
#[derive(Debug, Clone, Copy)]
pub struct ContextLayout {
    pub pc: u32,
    /// Signed remaining cycle budget; the epilogue checks for `<= 0`.
    pub cycles: u32,
    pub instrs: u32,
    pub interrupts: u32,
}

/// A single opcode-indexed interpreter fallback: `(guest, addr, raw_instr)`.
pub type FallbackFn<G> = fn(&mut G, addr: u64, raw_instr: u32);

/// The passive per-guest record threaded through the frontend and backend (`spec.md` §4.1).
///
/// `G` is the guest's own CPU state type (what interpreter fallbacks and runtime callbacks
/// operate on); `S` is its address-space token type.
pub trait GuestAdapter {
    type Guest;
    type Space: AddrSpace;

    /// Maximum guest-address range that needs a dispatcher-table slot.
    fn addr_mask(&self) -> u64;

    fn context_layout(&self) -> ContextLayout;

    /// Direct pointer into the guest's linear memory view, if the whole space is fastmem-backed.
    fn fastmem_base(&self) -> Option<*mut u8>;

    fn r8(&self, space: Self::Space, addr: u64) -> u8;
    fn r16(&self, space: Self::Space, addr: u64) -> u16;
    fn r32(&self, space: Self::Space, addr: u64) -> u32;
    fn r64(&self, space: Self::Space, addr: u64) -> u64;
    fn w8(&self, space: Self::Space, addr: u64, value: u8);
    fn w16(&self, space: Self::Space, addr: u64, value: u16);
    fn w32(&self, space: Self::Space, addr: u64, value: u32);
    fn w64(&self, space: Self::Space, addr: u64, value: u64);

    /// Resolves `addr` to either a direct fastmem pointer or an MMIO callback plus offset.
    fn lookup(&self, space: Self::Space, addr: u64) -> MemTarget<'_, Self::Space>;

    /// Synchronously compiles (or recompiles) the block starting at `guest_addr`.
    fn compile_code(&self, guest_addr: u64);

    /// Patches `branch_site`'s static-dispatch target to jump directly to `target_pc`'s block.
    fn link_code(&self, branch_site: u64, target_pc: u64);

    /// Services any pending interrupt; may mutate guest context state (PC, mode, mask).
    fn check_interrupts(&self);

    /// Opcode-indexed interpreter fallback table, indexed by the guest's own opcode numbering.
    fn fallback(&self, opcode: u32) -> Option<FallbackFn<Self::Guest>>;

    /// A short human-readable name, used for the perf-map tag (`spec.md` §6).
    fn name(&self) -> &str;

    /// Cycle-cost multiplier applied to an idle loop's body (`spec.md` §4.3: "multiplies each
    /// guest instruction's cycle cost by a fixed factor"). Defaults to the ×8 the source uses for
    /// both guests; exposed so a future guest with different scheduling granularity can override.
    fn idle_loop_cycle_multiplier(&self) -> u32 {
        8
    }

    // ---- guest-specific hooks (spec.md §4.1: "mode switches, TLB load, prefetch, sleep, SR/
    // FPSCR notifications") -------------------------------------------------

    /// Called when a translated block changes the processor mode register the frontend keyed a
    /// specialisation flag on, in case the guest needs to do bookkeeping beyond the IR `assert_eq`
    /// guard itself (e.g. swapping a banked register file view).
    fn on_mode_switch(&self, _guest: &mut Self::Guest, _new_mode: u32) {}

    /// Called by a `tlb_load`-flagged fallback's opcode before the fallback itself runs.
    fn on_tlb_load(&self, _guest: &mut Self::Guest, _addr: u64) {}

    /// Called when the guest executes a prefetch/cache-hint instruction with no IR translation.
    fn on_prefetch(&self, _guest: &mut Self::Guest, _addr: u64) {}

    /// Called when the guest executes a sleep/halt instruction; the driver still decrements the
    /// cycle budget but the guest may want to fast-forward to the next pending interrupt.
    fn on_sleep(&self, _guest: &mut Self::Guest) {}

    /// Called after a store to the guest's status/FPU-control register so the adapter can refresh
    /// any specialisation flags the frontend reads on the next translation of this PC.
    fn on_status_register_write(&self, _guest: &mut Self::Guest, _bits: u64) {}
}
