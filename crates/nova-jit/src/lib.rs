//! Guest-agnostic dynamic recompilation engine: the typed IR, the guest-frontend contract, the
//! fixed-order optimisation pipeline, and the wasm backend (`spec.md` §1–§4).
//!
//! Nothing in this crate knows which guest CPU it's lifting code for; that knowledge is confined
//! to whatever implements [`guest::GuestAdapter`] and [`frontend::Decoder`] and is passed in by
//! reference. `nova-runtime` owns the block registry, dispatcher table and scheduling loop that
//! actually drives this crate.

pub mod backend;
pub mod error;
pub mod frontend;
pub mod guest;
pub mod ir;
pub mod passes;
