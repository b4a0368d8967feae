//! Facade over the two published crates: `nova_jit` (the guest-agnostic compiler) and
//! `nova_runtime` (the block registry and driver that sits on top of it). Most consumers want
//! `nova_runtime::driver::Driver` plus whichever `nova_jit::guest::GuestAdapter` they implement
//! for their guest CPU.

pub use nova_jit;
pub use nova_runtime;
