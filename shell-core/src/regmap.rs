//! The hardware register map.
//!
//! Every magic address the firmware touches lives here, nowhere else.
//!
//! The paged RAM/ROM window works like this: write a device id to
//! [`WIN_DEVICE`] and a 4-KiB-page number to [`WIN_PAGE`], and the 4096
//! words at [`WIN_DATA`] become that page of that device. The selector
//! pair is shared by every subsystem, so a caller may never assume a
//! previous selection survived a call into other code.
//!
//! Word layout differs per device:
//! - image-buffer devices carry one image byte in the low byte of each
//!   word (4096 bytes per page),
//! - the cartridge DRAM device carries two file bytes per word,
//!   little-endian (8192 bytes per page),
//! - register-file devices (drive control, cartridge control) are plain
//!   word registers.

/// Control/status register.
pub const CSR: u16 = 0xFFE0;

/// Cycle counter, middle word (bits 15..0). Read this before [`CYCLE_HI`].
pub const CYCLE_MID: u16 = 0xFFE8;
/// Cycle counter, high word (bits 31..16).
pub const CYCLE_HI: u16 = 0xFFE9;

/// Keyboard matrix scan register.
pub const KBD_MATRIX: u16 = 0xFFEC;

/// RAM/ROM window: device selector.
pub const WIN_DEVICE: u16 = 0xFFF0;
/// RAM/ROM window: 4-KiB page selector.
pub const WIN_PAGE: u16 = 0xFFF1;
/// RAM/ROM window: first word of the 4096-word data window.
pub const WIN_DATA: u16 = 0x7000;
/// Words per data window.
pub const WIN_WORDS: u16 = 4096;

/// CSR bit assignments.
pub mod csr {
    /// Hold the emulated core in reset.
    pub const RESET: u16 = 1 << 0;
    /// Release the emulated core from pause.
    pub const UNPAUSE: u16 = 1 << 1;
    /// Attach the keyboard to the emulated core (0 = firmware owns it).
    pub const KBD_ATTACH: u16 = 1 << 2;
    /// Attach joystick port 1 to the emulated core.
    pub const JOY1_ATTACH: u16 = 1 << 3;
    /// Attach joystick port 2 to the emulated core.
    pub const JOY2_ATTACH: u16 = 1 << 4;
    /// Currently active SD slot (read-only observation).
    pub const SD_SLOT: u16 = 1 << 5;
}

/// Number of virtual drives built into the core.
pub const MAX_DRIVES: usize = 2;

/// Drive control register file. One device; the page selects the drive.
pub const DEV_DRIVE_CTL: u16 = 0x0100;
/// Image buffer RAM for drive 0; drive n is at `DEV_IMAGE_BASE + n`.
/// One byte per word, pages span the linear image 4096 bytes at a time.
pub const DEV_IMAGE_BASE: u16 = 0x0200;
/// Cartridge control register file (status, header fields, bank table port).
pub const DEV_CART_CTL: u16 = 0x0300;
/// Cartridge bank BRAM, lo bank. 8 KiB = exactly one window of words.
pub const DEV_BANK_LO: u16 = 0x0310;
/// Cartridge bank BRAM, hi bank.
pub const DEV_BANK_HI: u16 = 0x0311;
/// HyperRAM window onto the streamed cartridge file. Two bytes per word.
pub const DEV_CART_RAM: u16 = 0x0400;

/// Image buffer device id for a drive.
#[must_use]
pub const fn image_device(drive: usize) -> u16 {
    DEV_IMAGE_BASE + drive as u16
}

/// Drive control register file: word offsets within the drive's page.
pub mod drivereg {
    /// Core asserts: a read request is pending.
    pub const SD_RD: u16 = 0x00;
    /// Core asserts: a write request is pending.
    pub const SD_WR: u16 = 0x01;
    /// Firmware acknowledge; 1 at start of transfer, 0 after.
    pub const ACK: u16 = 0x02;
    /// Logical block address of the request (informational).
    pub const LBA_LO: u16 = 0x03;
    pub const LBA_HI: u16 = 0x04;
    /// Blocks in this transfer.
    pub const BLOCK_COUNT: u16 = 0x05;
    /// Byte-granular start address in the linear image buffer.
    pub const BYTES_LO: u16 = 0x06;
    pub const BYTES_HI: u16 = 0x07;
    /// Bytes to transfer for this request.
    pub const SIZE_BYTES: u16 = 0x08;
    /// Start address decomposed as 4-KiB page + offset.
    pub const WIN4K: u16 = 0x09;
    pub const OFF4K: u16 = 0x0A;
    /// Internal-buffer port: address, data out, data in, write strobe.
    pub const BUF_ADDR: u16 = 0x0B;
    pub const BUF_DOUT: u16 = 0x0C;
    pub const BUF_DIN: u16 = 0x0D;
    pub const BUF_WREN: u16 = 0x0E;
    /// Mount pulse; the core latches the auxiliaries on the rising edge.
    pub const MOUNT: u16 = 0x0F;
    /// Mount auxiliaries, valid during the pulse.
    pub const MOUNT_TYPE: u16 = 0x10;
    pub const MOUNT_RO: u16 = 0x11;
    pub const MOUNT_SIZE_LO: u16 = 0x12;
    pub const MOUNT_SIZE_HI: u16 = 0x13;
    /// Hardware asserts once the anti-thrash quiet period since the last
    /// core write has elapsed.
    pub const CACHE_READY: u16 = 0x14;
}

/// Cartridge control register file: word offsets within page 0.
pub mod cartreg {
    /// Loader status, see [`cartstat`](super::cartstat).
    pub const STATUS: u16 = 0x00;
    /// Cartridge file size in bytes.
    pub const FSIZE_LO: u16 = 0x01;
    pub const FSIZE_HI: u16 = 0x02;
    /// File start address in DRAM, in 16-word units.
    pub const ADDR_LO: u16 = 0x03;
    pub const ADDR_HI: u16 = 0x04;
    /// Error word: 0xFFFF = busy, 0 = none, else an error code.
    pub const ERR: u16 = 0x05;
    /// Diagnostic words: byte offset at which a parse error was detected.
    pub const ERR_ADDR_LO: u16 = 0x06;
    pub const ERR_ADDR_HI: u16 = 0x07;
    /// Published header fields.
    pub const CART_ID: u16 = 0x08;
    pub const EXROM: u16 = 0x09;
    pub const GAME: u16 = 0x0A;
    /// Bank table write port; [`BT_STROBE`] publishes one entry.
    pub const BT_LOAD_ADDR: u16 = 0x0B;
    pub const BT_SIZE: u16 = 0x0C;
    pub const BT_BANK: u16 = 0x0D;
    pub const BT_OFFS_LO: u16 = 0x0E;
    pub const BT_OFFS_HI: u16 = 0x0F;
    pub const BT_STROBE: u16 = 0x10;
    /// Bank the core wants in the lo / hi BRAM.
    pub const BANK_LO_REQ: u16 = 0x11;
    pub const BANK_HI_REQ: u16 = 0x12;
}

/// Values of [`cartreg::STATUS`].
pub mod cartstat {
    pub const NOT_STARTED: u16 = 0;
    pub const LOADING: u16 = 1;
    pub const ERROR: u16 = 2;
    pub const SUCCESS: u16 = 3;
    /// [`cartreg::ERR`] value while a load is in progress.
    pub const ERR_BUSY: u16 = 0xFFFF;
}
