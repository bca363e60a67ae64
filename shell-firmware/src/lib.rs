//! The Shell: firmware for a soft processor sitting next to an
//! FPGA-emulated retro computer.
//!
//! The Shell mediates between the emulated core, the user and external
//! storage:
//! - it mounts disk images from SD card into memory-mapped image buffers,
//! - it services the core's read/write requests against those buffers and
//!   writes dirty buffers back to the card in small, deferred batches,
//! - it parses cartridge (CRT) containers streamed into HyperRAM and
//!   feeds the core's two 8-KiB bank BRAMs on demand.
//!
//! There is exactly one control flow: an infinite cooperative main loop
//! ([`Shell::run_pass`]). Every subsystem is a plain function over shared
//! state that returns promptly; the three hardware peers (emulated core,
//! SD controller, HyperRAM DMA) run in parallel and are observed only
//! through memory-mapped registers.

pub mod crt;
pub mod dispatcher;
mod error;
pub mod fat;
pub mod flush;
mod hif;
pub mod settings;
mod shell;
pub mod vdr;

pub use error::{FatalCode, ShellError, ShellResult};
pub use hif::{DataWindow, Hif};
pub use shell::Shell;
