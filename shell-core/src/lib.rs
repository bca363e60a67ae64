//! Core traits and types for the Shell firmware.
//!
//! The Shell runs on a 16-bit soft processor embedded next to an
//! FPGA-emulated retro computer. Everything the firmware can see of the
//! outside world is a flat 16-bit word bus of memory-mapped registers;
//! everything it can do happens through that bus. This crate defines the
//! bus trait, the complete register map, and the wrapping cycle-counter
//! arithmetic used for timed waits.

mod bus;
pub mod regmap;
mod timer;

pub use bus::Mmio;
pub use timer::{Deadline, CYCLES_PER_MS};
