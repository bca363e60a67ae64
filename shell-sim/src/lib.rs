//! Software model of the Shell's three hardware peers.
//!
//! [`SimMachine`] implements the firmware's word bus and behaves like the
//! hardware: the emulated core's drive register files raise read/write
//! requests and drop them on acknowledge, the mount latch samples its
//! auxiliaries on the rising edge, the anti-thrash timer counts quiet
//! cycles since the core's last write, and the HyperRAM device packs the
//! cartridge byte stream two-to-a-word, little-endian.
//!
//! [`MemVolume`] is the matching FAT32 stand-in: an in-memory file set
//! with per-operation fault injection.

mod machine;
mod volume;

pub use machine::{CartCtl, MountEvent, PublishedBank, SimMachine};
pub use volume::{FailOp, MemVolume};
